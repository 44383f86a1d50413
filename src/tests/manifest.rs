use crate::android::binary_xml::AxmlDecoder;
use crate::error::DecodeError;
use crate::tests::fixtures::AxmlFixture;

const STRINGS: &[&str] = &[
    "manifest",                    // 0
    "package",                     // 1
    "com.example.app",             // 2
    "instrumentation",             // 3
    "name",                        // 4
    "com.example.test.Runner",     // 5
    "targetPackage",               // 6
    "functionalTest",              // 7
    "true",                        // 8
    "uses-sdk",                    // 9
    "minSdkVersion",               // 10
    "targetSdkVersion",            // 11
    "uses-permission",             // 12
    "android.permission.INTERNET", // 13
    "handleProfiling",             // 14
    "false",                       // 15
];

fn manifest_fixture() -> AxmlFixture {
    // a couple of pool entries in the older utf-16 form, the rest utf-8
    let mut fixture = AxmlFixture::new(STRINGS).encode_utf16(&[0, 2]);
    fixture.start_namespace();
    fixture.start_tag(0, &[(1, 2, -1)]);
    fixture.start_tag(3, &[(4, 5, -1), (6, 2, -1), (7, 8, -1), (14, 15, -1)]);
    fixture.end_tag(3);
    fixture.start_tag(9, &[(10, -1, 0xF), (11, -1, 0x1C)]);
    fixture.end_tag(9);
    fixture.start_tag(12, &[(4, 13, -1)]);
    fixture.end_tag(12);
    fixture.start_tag(12, &[(4, 13, -1)]);
    fixture.end_tag(12);
    fixture.end_tag(0);
    fixture
}

#[test]
fn extracts_package_and_children() {
    let manifest = AxmlDecoder::from_bytes(manifest_fixture().build())
        .unwrap()
        .decode()
        .unwrap();

    assert_eq!(manifest.package_name(), Some("com.example.app"));

    let root = manifest.root().unwrap();
    assert_eq!(root.name, "manifest");
    assert_eq!(root.children.len(), 4);

    let instrumentation = manifest.instrumentation().unwrap();
    assert_eq!(instrumentation.runner.as_deref(), Some("com.example.test.Runner"));
    assert_eq!(instrumentation.target_package.as_deref(), Some("com.example.app"));
    assert!(instrumentation.functional_test);
    assert!(!instrumentation.handle_profiling);
    assert!(instrumentation.label.is_none());

    let uses_sdk = manifest.uses_sdk().unwrap();
    assert_eq!(uses_sdk.min_sdk_version, 15);
    assert_eq!(uses_sdk.target_sdk_version, 28);

    assert_eq!(
        manifest.permissions(),
        &[
            "android.permission.INTERNET".to_string(),
            "android.permission.INTERNET".to_string(),
        ]
    );
}

#[test]
fn resource_only_attributes_get_placeholder_values() {
    let manifest = AxmlDecoder::from_bytes(manifest_fixture().build())
        .unwrap()
        .decode()
        .unwrap();
    let uses_sdk_tag = manifest.root().unwrap().find_child("uses-sdk").unwrap();
    assert_eq!(
        uses_sdk_tag.attr("minSdkVersion").as_deref(),
        Some("resourceID 0xf")
    );
    assert_eq!(
        uses_sdk_tag.attr("targetSdkVersion").as_deref(),
        Some("resourceID 0x1c")
    );
}

#[test]
fn renders_readable_xml() {
    let manifest = AxmlDecoder::from_bytes(manifest_fixture().build())
        .unwrap()
        .decode()
        .unwrap();
    let xml = manifest.xml().unwrap();
    assert!(xml.contains("<manifest package=\"com.example.app\""));
    assert!(xml.contains("<uses-sdk"));
    assert!(xml.contains("</manifest>"));
}

#[test]
fn non_manifest_root_yields_no_facts() {
    let mut fixture = AxmlFixture::new(&["application"]);
    fixture.start_tag(0, &[]);
    fixture.end_tag(0);
    let manifest = AxmlDecoder::from_bytes(fixture.build())
        .unwrap()
        .decode()
        .unwrap();
    assert_eq!(manifest.root().unwrap().name, "application");
    assert!(manifest.package_name().is_none());
    assert!(manifest.instrumentation().is_none());
    assert!(manifest.uses_sdk().is_none());
    assert!(manifest.permissions().is_empty());
}

#[test]
fn bad_leading_chunk_tag_is_rejected() {
    let bytes = vec![0u8; 64];
    assert!(matches!(
        AxmlDecoder::from_bytes(bytes),
        Err(DecodeError::Format(_))
    ));
}

#[test]
fn uses_sdk_without_min_version_fails() {
    let mut fixture = AxmlFixture::new(&["manifest", "uses-sdk", "targetSdkVersion"]);
    fixture.start_tag(0, &[]);
    fixture.start_tag(1, &[(2, -1, 0x1C)]);
    fixture.end_tag(1);
    fixture.end_tag(0);
    let result = AxmlDecoder::from_bytes(fixture.build()).unwrap().decode();
    assert!(matches!(result, Err(DecodeError::Format(_))));
}

#[test]
fn truncated_token_stream_surfaces_io_error() {
    let mut bytes = manifest_fixture().build();
    // drop the end-document record
    bytes.truncate(bytes.len() - 16);
    let result = AxmlDecoder::from_bytes(bytes).unwrap().decode();
    assert!(matches!(result, Err(DecodeError::Io(_))));
}
