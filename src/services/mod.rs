pub mod catalog;
pub mod orchestrator;
pub mod path_resolver;
pub mod tool_files;
pub mod transfer;
pub mod version_ledger;
