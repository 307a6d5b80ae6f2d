//! Writes the greenhouse OpenAPI document.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output openapi.json

use std::{
    env, fs,
    io::{self, Write},
    path::PathBuf,
    process,
};

use greenhouse_service::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() {
    let doc = ApiDoc::openapi();
    let paths = doc.paths.paths.len();
    let json = doc.to_pretty_json().unwrap_or_else(|e| {
        eprintln!("Failed to serialise OpenAPI document: {e}");
        process::exit(1);
    });

    let output: Option<PathBuf> = env::args()
        .skip_while(|arg| arg != "--output")
        .nth(1)
        .map(PathBuf::from);

    let written = match &output {
        Some(path) => fs::write(path, &json),
        None => io::stdout().write_all(json.as_bytes()),
    };
    if let Err(e) = written {
        eprintln!("Failed to write OpenAPI document: {e}");
        process::exit(1);
    }
    if let Some(path) = output {
        eprintln!("OpenAPI document with {paths} paths written to {}", path.display());
    }
}
