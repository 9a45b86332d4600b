// Library root
// -----------
// This crate exposes the import pipeline as a library. The binary
// (`main.rs`) only parses arguments and hands off to `cli`.
//
// Module responsibilities:
// - `loader`: Reads the lead CSV into normalized `Record`s.
// - `batch`: Splits records into ordered, size-bounded batches.
// - `api`: The blocking HTTP transport and the request/response shapes.
// - `retry`: Wraps a transport with the 429/5xx backoff policy.
// - `auth`: Resolves credentials and implements the `login` flow.
// - `config`: Import settings with environment overrides.
// - `import`: The orchestrator (create client, upload batches, verify).
// - `ui`: Progress and summary rendering for the terminal.
// - `cli`: Argument definitions and command handlers.
//
// The network and the clock are reached only through the `Transport`
// and `Sleeper` traits, so the whole pipeline can be driven in tests
// without a server and without waiting.
pub mod api;
pub mod auth;
pub mod batch;
pub mod cli;
pub mod config;
pub mod import;
pub mod loader;
pub mod retry;
pub mod ui;
