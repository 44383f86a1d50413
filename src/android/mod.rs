pub mod binary_xml;
