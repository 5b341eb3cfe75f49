//! `manifest_verify`: check a directory against its own self-hashing
//! manifest file. Exits non-zero and prints the mismatch on any tamper.
//!
//! ```bash
//! manifest_verify --dir outputs/shared/2026Q1/d1/bars --manifest bars_manifest.json
//! ```

use clap::Parser;
use quantbench::error::CoreResult;
use quantbench::verify;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "manifest_verify", version, about = "Verify a directory against its self-hashing manifest")]
struct Args {
    #[arg(long)]
    dir: PathBuf,
    #[arg(long, default_value = "manifest.json")]
    manifest: String,
    #[arg(long, default_value = "files")]
    files_field: String,
    #[arg(long, default_value = "manifest_sha256")]
    self_hash_field: String,
}

fn run(args: Args) -> CoreResult<()> {
    let report = verify::verify_manifest(&args.dir, &args.manifest, &args.files_field, &args.self_hash_field)?;
    println!("OK: {} file(s) verified against {}", report.verified_files.len(), report.manifest_filename);
    for name in &report.verified_files {
        println!("  {name}");
    }
    Ok(())
}

fn main() -> ExitCode {
    quantbench::config::load_dotenv();
    quantbench::config::init_tracing();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "manifest_verify failed");
            eprintln!("TAMPER: {e}");
            ExitCode::FAILURE
        }
    }
}
