use crate::dex::DexDecoder;
use crate::error::DecodeError;
use crate::tests::fixtures::{ClassSpec, DexFixture};

fn junit3_fixture() -> DexFixture {
    DexFixture {
        strings: vec![
            "Lcom/example/FooTest;".to_string(),
            "Ljunit/framework/TestCase;".to_string(),
            "testFoo".to_string(),
            "helper".to_string(),
        ],
        type_descriptor_indices: vec![0, 1],
        methods: vec![(0, 2), (0, 3)],
        classes: vec![ClassSpec {
            type_index: 0,
            super_type_index: 1,
            virtual_methods: vec![(0, 0x1), (1, 0x1)],
            method_annotations: vec![],
        }],
    }
}

#[test]
fn junit3_takes_test_prefixed_virtual_methods() {
    let mut decoder = DexDecoder::from_bytes(junit3_fixture().build()).unwrap();
    let tests = decoder.find_junit3_tests(&[]).unwrap();
    assert_eq!(tests, vec!["com.example.FooTest#testFoo".to_string()]);
}

#[test]
fn junit3_discovery_is_transitive_in_table_order() {
    // C extends A but appears before it, so C is missed; B appears after A
    // and is picked up through it.
    let fixture = DexFixture {
        strings: vec![
            "Lx/C;".to_string(),
            "Lx/A;".to_string(),
            "Lx/B;".to_string(),
            "Ljunit/framework/TestCase;".to_string(),
            "testA".to_string(),
            "testB".to_string(),
            "testC".to_string(),
        ],
        type_descriptor_indices: vec![0, 1, 2, 3],
        methods: vec![(1, 4), (2, 5), (0, 6)],
        classes: vec![
            ClassSpec {
                type_index: 0,
                super_type_index: 1,
                virtual_methods: vec![(2, 0x1)],
                method_annotations: vec![],
            },
            ClassSpec {
                type_index: 1,
                super_type_index: 3,
                virtual_methods: vec![(0, 0x1)],
                method_annotations: vec![],
            },
            ClassSpec {
                type_index: 2,
                super_type_index: 1,
                virtual_methods: vec![(1, 0x1)],
                method_annotations: vec![],
            },
        ],
    };
    let mut decoder = DexDecoder::from_bytes(fixture.build()).unwrap();
    let tests = decoder.find_junit3_tests(&[]).unwrap();
    assert_eq!(tests, vec!["x.A#testA".to_string(), "x.B#testB".to_string()]);
}

#[test]
fn method_index_diffs_are_read_literally() {
    // Two virtual entries both carrying diff 1 resolve to the same method id,
    // they are not accumulated.
    let fixture = DexFixture {
        strings: vec![
            "Lcom/d/DiffTest;".to_string(),
            "Ljunit/framework/TestCase;".to_string(),
            "testOne".to_string(),
            "testTwo".to_string(),
        ],
        type_descriptor_indices: vec![0, 1],
        methods: vec![(0, 2), (0, 3)],
        classes: vec![ClassSpec {
            type_index: 0,
            super_type_index: 1,
            virtual_methods: vec![(1, 0x1), (1, 0x1)],
            method_annotations: vec![],
        }],
    };
    let mut decoder = DexDecoder::from_bytes(fixture.build()).unwrap();
    let tests = decoder.find_junit3_tests(&[]).unwrap();
    assert_eq!(
        tests,
        vec![
            "com.d.DiffTest#testTwo".to_string(),
            "com.d.DiffTest#testTwo".to_string(),
        ]
    );
}

#[test]
fn filters_match_on_dotted_name_substrings() {
    let bytes = junit3_fixture().build();

    let mut decoder = DexDecoder::from_bytes(bytes.clone()).unwrap();
    let kept = decoder.find_junit3_tests(&["com.example".to_string()]).unwrap();
    assert_eq!(kept.len(), 1);

    let mut decoder = DexDecoder::from_bytes(bytes).unwrap();
    let dropped = decoder
        .find_junit3_tests(&["net.other".to_string(), "org.elsewhere".to_string()])
        .unwrap();
    assert!(dropped.is_empty());
}

fn junit4_fixture() -> DexFixture {
    DexFixture {
        strings: vec![
            "Lcom/example/BarTest;".to_string(),
            "Lorg/junit/Test;".to_string(),
            "Lorg/junit/Ignore;".to_string(),
            "testBar".to_string(),
            "testSkipped".to_string(),
            "Ljava/lang/Object;".to_string(),
        ],
        type_descriptor_indices: vec![0, 1, 2, 5],
        methods: vec![(0, 3), (0, 4)],
        classes: vec![ClassSpec {
            type_index: 0,
            super_type_index: 3,
            virtual_methods: vec![],
            method_annotations: vec![(0, vec![1]), (1, vec![1, 2])],
        }],
    }
}

#[test]
fn junit4_takes_annotated_methods_and_honours_ignore() {
    let mut decoder = DexDecoder::from_bytes(junit4_fixture().build()).unwrap();
    let tests = decoder.find_junit4_tests(&[]).unwrap();
    assert_eq!(tests, vec!["com.example.BarTest#testBar".to_string()]);
}

#[test]
fn junit4_respects_filters() {
    let mut decoder = DexDecoder::from_bytes(junit4_fixture().build()).unwrap();
    let tests = decoder.find_junit4_tests(&["net.other".to_string()]).unwrap();
    assert!(tests.is_empty());
}

#[test]
fn find_tests_concatenates_both_conventions() {
    let fixture = DexFixture {
        strings: vec![
            "Lcom/app/ThreeTest;".to_string(),
            "Ljunit/framework/TestCase;".to_string(),
            "testOld".to_string(),
            "Lcom/app/FourTest;".to_string(),
            "Lorg/junit/Test;".to_string(),
            "testNew".to_string(),
            "Ljava/lang/Object;".to_string(),
        ],
        type_descriptor_indices: vec![0, 1, 3, 4, 6],
        methods: vec![(0, 2), (2, 5)],
        classes: vec![
            ClassSpec {
                type_index: 0,
                super_type_index: 1,
                virtual_methods: vec![(0, 0x1)],
                method_annotations: vec![],
            },
            ClassSpec {
                type_index: 2,
                super_type_index: 4,
                virtual_methods: vec![],
                method_annotations: vec![(1, vec![3])],
            },
        ],
    };
    let mut decoder = DexDecoder::from_bytes(fixture.build()).unwrap();
    let tests = decoder.find_tests(&[]).unwrap();
    assert_eq!(
        tests,
        vec![
            "com.app.ThreeTest#testOld".to_string(),
            "com.app.FourTest#testNew".to_string(),
        ]
    );
}

#[test]
fn corrupt_magic_is_rejected_before_any_table_access() {
    let mut bytes = junit3_fixture().build();
    bytes[0] = 0xFF;
    assert!(matches!(
        DexDecoder::from_bytes(bytes),
        Err(DecodeError::Format(_))
    ));
}

#[test]
fn wrong_endian_tag_is_rejected() {
    let mut bytes = junit3_fixture().build();
    // endian tag sits after magic, checksum, signature and two size words
    bytes[40..44].copy_from_slice(&0x78563412u32.to_le_bytes());
    assert!(matches!(
        DexDecoder::from_bytes(bytes),
        Err(DecodeError::Format(_))
    ));
}

#[test]
fn out_of_range_lookups_report_the_table_size() {
    let mut decoder = DexDecoder::from_bytes(junit3_fixture().build()).unwrap();
    assert!(matches!(
        decoder.string(99),
        Err(DecodeError::Index { index: 99, count: 4 })
    ));
    assert!(matches!(
        decoder.type_descriptor(2),
        Err(DecodeError::Index { index: 2, count: 2 })
    ));
}

#[test]
fn header_reports_table_shapes() {
    let decoder = DexDecoder::from_bytes(junit3_fixture().build()).unwrap();
    let header = decoder.header();
    assert_eq!(header.string_ids_size, 4);
    assert_eq!(header.type_ids_size, 2);
    assert_eq!(header.method_ids_size, 2);
    assert_eq!(header.class_defs_size, 1);
    assert_eq!(header.header_size, 0x70);
}

#[test]
fn string_resolution_skips_the_utf16_length_prefix() {
    let mut decoder = DexDecoder::from_bytes(junit3_fixture().build()).unwrap();
    assert_eq!(decoder.string(2).unwrap(), "testFoo");
    assert_eq!(decoder.type_descriptor(1).unwrap(), "Ljunit/framework/TestCase;");
    assert_eq!(decoder.method_name(1).unwrap(), "helper");
}
