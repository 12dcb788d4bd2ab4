pub mod in_memory_store;
pub mod jsonl_store;
