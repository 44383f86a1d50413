pub mod annotations;
pub mod dex_file;
pub mod encoded_values;

use once_cell::sync::Lazy;

pub use crate::dex::dex_file::{ClassDef, DexDecoder, DexHeader};

/* Dex header constants */
pub const MAGIC_DEX: [u8; 3] = [0x64, 0x65, 0x78]; // "dex"
pub const MAGIC_VERSION: [u8; 3] = [0x30, 0x33, 0x35]; // "035"
pub const ENDIAN_CONSTANT: u32 = 0x12345678;

/* Class access flags */
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_PROTECTED: u32 = 0x4;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_SYNCHRONIZED: u32 = 0x20;
pub const ACC_VOLATILE: u32 = 0x40;
pub const ACC_BRIDGE: u32 = 0x40;
pub const ACC_TRANSIENT: u32 = 0x80;
pub const ACC_VARARGS: u32 = 0x80;
pub const ACC_NATIVE: u32 = 0x100;
pub const ACC_INTERFACE: u32 = 0x200;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_STRICT: u32 = 0x800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;
pub const ACC_DECLARED_SYNCHRONIZED: u32 = 0x20000;

/* Annotation descriptors driving JUnit 4 style discovery */
pub const TEST_ANNOTATION: &str = "Lorg/junit/Test;";
pub const IGNORE_ANNOTATION: &str = "Lorg/junit/Ignore;";

/// JNI descriptors of the framework base classes whose direct and transitive
/// subclasses are treated as JUnit 3 test cases.
pub static JUNIT3_BASE_DESCRIPTORS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Ljunit/framework/TestCase;",
        "Landroid/test/ActivityInstrumentationTestCase;",
        "Landroid/test/ActivityInstrumentationTestCase2;",
        "Landroid/test/ActivityTestCase;",
        "Landroid/test/ActivityUnitTestCase;",
        "Landroid/test/AndroidTestCase;",
        "Landroid/test/ApplicationTestCase;",
        "Landroid/test/FailedToCreateTests;",
        "Landroid/test/InstrumentationTestCase;",
        "Landroid/test/LoaderTestCase;",
        "Landroid/test/ProviderTestCase;",
        "Landroid/test/ProviderTestCase2;",
        "Landroid/test/ServiceTestCase;",
        "Landroid/test/SingleLaunchActivityTestCase;",
        "Landroid/test/SyncBaseInstrumentation;",
    ]
});
