//! folio binary.
//!
//! ```bash
//! folio init "Design notes"
//! folio add doc_… "First paragraph"
//! folio tree doc_… --limit 20
//! folio tree doc_… --at 3
//! folio revert doc_… 3
//! ```

use std::process::ExitCode;

use clap::Parser;
use folio_cli::{Cli, open_engine, run};
use folio_engine::EngineError;

fn main() -> ExitCode {
    let _guard = folio_telemetry::init_tracing("folio", "warn");
    let cli = Cli::parse();

    let result = open_engine(&cli).and_then(|engine| run(&engine, &cli, &mut std::io::stdout().lock()));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let kind = e
                .downcast_ref::<EngineError>()
                .map(|err| err.kind().as_ref().to_string());
            match kind {
                Some(kind) => eprintln!("error [{kind}]: {e:#}"),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
