pub mod file_reference_store;
pub mod json_reference_file;
pub mod onnx_embedding_service;
