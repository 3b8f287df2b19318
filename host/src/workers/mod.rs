pub mod download_runner;
pub mod tool_locator;
