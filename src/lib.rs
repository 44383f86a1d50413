//! # Dexprobe
//!
//! A library for extracting test method names and manifest metadata from
//! compiled Android packages
//!
use std::path::Path;

pub mod android;
pub mod dex;
pub mod error;
pub mod stream;
#[cfg(test)]
mod tests;

pub use crate::android::binary_xml::{AxmlDecoder, Manifest};
pub use crate::dex::DexDecoder;
pub use crate::error::{DecodeError, DecodeResult};

/// Lists every JUnit 3 and JUnit 4 test in an extracted classes.dex file as
/// `some.dotted.Class#methodName`, optionally restricted to classes whose
/// dotted name contains one of the filters
///
/// # Examples
///
/// ```no_run
///  use dexprobe::find_dex_tests;
///  use std::path::Path;
///
///  let tests = find_dex_tests(Path::new("classes.dex"), &[]).unwrap();
///  println!("{:} tests found.", tests.len());
/// ```
pub fn find_dex_tests(path: &Path, filters: &[String]) -> DecodeResult<Vec<String>> {
    let mut decoder = DexDecoder::open(path)?;
    decoder.find_tests(filters)
}

/// Decodes a binary AndroidManifest.xml file extracted from an apk
///
/// # Examples
///
/// ```no_run
///  use dexprobe::read_manifest;
///  use std::path::Path;
///
///  let manifest = read_manifest(Path::new("AndroidManifest.xml")).unwrap();
///  println!("package: {:?}", manifest.package_name());
/// ```
pub fn read_manifest(path: &Path) -> DecodeResult<Manifest> {
    AxmlDecoder::open(path)?.decode()
}
