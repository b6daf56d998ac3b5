//! JSONL request dispatch for session commands.
//!
//! Each connection carries exactly one request line and receives exactly
//! one reply line. Requests are tagged by `operation`:
//!
//! ```json
//! {"operation":"create-session"}
//! {"operation":"compile","sessionId":"lx3k9a-0f1e2d3c4b5a","code":"int main(void){return 0;}"}
//! {"operation":"run","sessionId":"lx3k9a-0f1e2d3c4b5a","stdin":"ping\n"}
//! {"operation":"compile-run","sessionId":"lx3k9a-0f1e2d3c4b5a","code":"...","stdin":""}
//! ```
//!
//! Replies are tagged by `kind`:
//!
//! ```json
//! {"kind":"session","sessionId":"lx3k9a-0f1e2d3c4b5a"}
//! {"kind":"compile","succeeded":true,"message":"Compilation successful."}
//! {"kind":"run","succeeded":true,"output":"hello\n"}
//! {"kind":"run","succeeded":false,"output":"Invalid sessionId","error":"unknown_session"}
//! {"kind":"error","error":"malformed_request","message":"..."}
//! ```
//!
//! Compile, run and compile-run always answer in their own `kind`, with an
//! `error` code alongside `succeeded: false` when they fail for any reason.
//! Compile-run answers as `run`; a rejected program puts the compiler's
//! diagnostics in `output`. Protocol violations and failures to create a
//! session use the `error` kind.

mod errors;
mod handler;
mod request;
mod response;
mod router;

pub(crate) use self::handler::DispatchConnectionHandler;
