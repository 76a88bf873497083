//! Stand-in runtime executable.
//!
//! Serves canned answers over stdin/stdout. The shared identity arrives as
//! the sole argument and is reported back as part of the version string.

use std::process::ExitCode;

use tether_runtime::{StubBehavior, StubRuntime};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let Some(identity) = std::env::args().nth(1) else {
        eprintln!("usage: tether-stub <identity>");
        return ExitCode::from(2);
    };

    let behavior = StubBehavior {
        version: format!("stub-1.0.0+{}", identity),
        ..StubBehavior::default()
    };

    match StubRuntime::new(tokio::io::stdin(), tokio::io::stdout(), behavior)
        .run()
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("stub runtime failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
