//! # CLI Command Implementations

use super::Target;
use crate::config::{Backend, Config};
use crate::document::Document;
use crate::error::AppError;
use quarry_core::{
    Answer, Pattern, ReasonerQuery, Session, TransactionKind, TransactionOptions, WriteMode,
    compile_match, compile_write,
};
use std::path::Path;

/// Maximum size of a pattern document (16 MB).
const MAX_DOCUMENT_SIZE: u64 = 16 * 1024 * 1024;

fn read_document(path: &Path) -> Result<Document, AppError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| AppError::Io(format!("{}: {e}", path.display())))?;
    if !metadata.is_file() {
        return Err(AppError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_DOCUMENT_SIZE {
        return Err(AppError::Io(format!(
            "Document size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_DOCUMENT_SIZE
        )));
    }
    Ok(Document::from_file(path)?)
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create an empty database at `storage.data`.
pub fn cmd_init(config: &Config, force: bool) -> Result<(), AppError> {
    let path = &config.storage.data;
    if config.storage.backend == Backend::Memory {
        return Err(AppError::Usage(
            "The memory backend has nothing to initialize.".to_string(),
        ));
    }
    if path.exists() {
        if !force {
            return Err(AppError::Usage(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path).map_err(|e| AppError::Io(format!("{}: {e}", path.display())))?;
    }

    let mut session = open_session(config, TransactionKind::Schema)?;
    session.commit()?;
    println!("Initialized new database at {:?}", path);
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), AppError> {
    let session = open_session(config, TransactionKind::Data)?;
    let stats = session.stats()?;

    if json_mode {
        print_json(&serde_json::json!({
            "database": config.storage.data.to_string_lossy(),
            "backend": config.storage.backend,
            "schema_concepts": stats.schema_concepts,
            "things": stats.things,
        }));
        return Ok(());
    }

    println!("Quarry Status");
    println!("=============");
    println!("Database:        {:?}", config.storage.data);
    println!("Backend:         {:?}", config.storage.backend);
    println!();
    println!("Schema concepts: {}", stats.schema_concepts);
    println!("Things:          {}", stats.things);
    Ok(())
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Run a define/undefine/insert/delete document and commit.
pub fn cmd_write(
    config: &Config,
    json_mode: bool,
    mode: WriteMode,
    file: &Path,
) -> Result<(), AppError> {
    let document = read_document(file)?;
    let pattern = document.to_pattern()?;

    let kind = if mode.is_schema() {
        TransactionKind::Schema
    } else {
        TransactionKind::Data
    };
    let mut session = open_session(config, kind)?;
    let answers = session.write(mode, &pattern, &document.bound())?;
    session.commit()?;
    if !session.is_persistent() {
        tracing::warn!(%mode, "memory backend: changes are discarded on exit");
    }

    if json_mode {
        let rows: Vec<serde_json::Value> = answers.iter().map(answer_json).collect();
        print_json(&serde_json::json!({ "mode": mode.to_string(), "answers": rows }));
        return Ok(());
    }

    for answer in &answers {
        println!("{answer}");
    }
    Ok(())
}

fn answer_json(answer: &Answer) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = answer
        .named()
        .map(|(var, id)| (var.name().to_string(), serde_json::Value::from(id.0)))
        .collect();
    serde_json::Value::Object(map)
}

// =============================================================================
// COMPILE COMMAND
// =============================================================================

/// Render what `pattern` compiles to, one string per conjunct.
pub fn compile_output(
    pattern: &Pattern,
    bound: &Answer,
    target: Target,
    mode: WriteMode,
) -> Result<Vec<String>, AppError> {
    Ok(match target {
        Target::Fragments => compile_match(pattern)
            .conjuncts
            .iter()
            .map(|conjunct| {
                conjunct
                    .fragments
                    .iter()
                    .map(|f| format!("{f}\n"))
                    .collect::<String>()
            })
            .collect(),
        Target::Steps => compile_write(pattern, mode, bound)?
            .iter()
            .map(ToString::to_string)
            .collect(),
        Target::Atoms => ReasonerQuery::from_pattern(pattern)
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

pub fn cmd_compile(
    json_mode: bool,
    file: &Path,
    target: Target,
    mode: WriteMode,
) -> Result<(), AppError> {
    let document = read_document(file)?;
    let pattern = document.to_pattern()?;
    let conjuncts = compile_output(&pattern, &document.bound(), target, mode)?;

    if json_mode {
        print_json(&serde_json::json!({ "conjuncts": conjuncts }));
        return Ok(());
    }

    for (i, conjunct) in conjuncts.iter().enumerate() {
        println!("conjunct {i}");
        for line in conjunct.lines() {
            println!("  {line}");
        }
    }
    Ok(())
}

// =============================================================================
// CONFIG COMMAND
// =============================================================================

pub fn cmd_config(config: &Config, json_mode: bool) -> Result<(), AppError> {
    if json_mode {
        let value = serde_json::to_value(config).map_err(|e| AppError::Io(e.to_string()))?;
        print_json(&value);
        return Ok(());
    }

    println!("storage.data    = {}", config.storage.data.display());
    println!("storage.backend = {:?}", config.storage.backend);
    println!("log.level       = {}", config.log.level);
    println!("log.format      = {:?}", config.log.format);
    println!("log.output      = {:?}", config.log.outputs);
    println!("log.directory   = {}", config.log.directory.display());
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the configured backend with a transaction of `kind`.
pub fn open_session(config: &Config, kind: TransactionKind) -> Result<Session, AppError> {
    let options = TransactionOptions { kind };
    match config.storage.backend {
        Backend::Memory => Ok(Session::in_memory(options)?),
        Backend::Redb => {
            if let Some(parent) = config.storage.data.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AppError::Io(format!("{}: {e}", parent.display())))?;
            }
            Ok(Session::open(&config.storage.data, options)?)
        }
    }
}
