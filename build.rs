use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use std::env;
use vergen_gitcl::{Emitter, GitclBuilder};

fn main() -> Result<()> {
    emit_git_describe()?;

    println!(
        "cargo:rustc-env=BUILD_TIMESTAMP={}",
        build_time()?.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    Ok(())
}

/// Emits `VERGEN_GIT_DESCRIBE`, or nothing when the tree is not a git checkout.
fn emit_git_describe() -> Result<()> {
    let gitcl = GitclBuilder::default()
        .describe(true, true, Some("[0-9]*"))
        .build()?;

    let emitted = Emitter::default()
        .idempotent()
        .fail_on_error()
        .add_instructions(&gitcl)
        .and_then(|emitter| emitter.emit());

    if let Err(e) = emitted {
        println!("cargo:warning=git describe unavailable: {e}");
        Emitter::default().idempotent().emit()?;
    }

    Ok(())
}

/// Honours `SOURCE_DATE_EPOCH` for reproducible builds.
fn build_time() -> Result<DateTime<Utc>> {
    match env::var("SOURCE_DATE_EPOCH") {
        Ok(val) => Utc
            .timestamp_opt(val.trim().parse::<i64>()?, 0)
            .single()
            .ok_or_else(|| anyhow!("SOURCE_DATE_EPOCH out of range: {val}")),
        Err(_) => Ok(Utc::now()),
    }
}
