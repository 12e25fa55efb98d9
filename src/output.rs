use std::io::{self, Write};

use serde::Serialize;

use crate::app::{
    CheckResult, ExportResult, InfoResult, InitResult, InsertRefResult, InsertResult,
    ProgressEvent, ProgressSink, TransferAction, TransferResult, UpdateResult,
};
use crate::domain::{FileRecord, FileTriple};
use crate::fs_util::render_tsv;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Plain-text rendering for an operator at a terminal.
pub struct HumanOutput;

impl HumanOutput {
    pub fn print_init(result: &InitResult) {
        if !result.config_persisted {
            println!(
                "config {} is read-only; set `dbpath: {}` manually",
                result.config_path, result.dbpath
            );
        }
        println!("created catalog: {}", result.dbpath);
    }

    pub fn print_insert(result: &InsertResult) {
        println!("inserted record: {}", result.filepath);
    }

    pub fn print_insert_ref(result: &InsertRefResult) {
        if result.inserted {
            println!("inserted ref record for {}", result.pmid);
        } else {
            println!("ref record for {} already exists", result.pmid);
        }
    }

    pub fn print_update(result: &UpdateResult) {
        if result.updated == 0 {
            println!("no record for {}; nothing updated", result.filepath);
        } else {
            println!("updated {} for {}", result.column, result.filepath);
        }
    }

    pub fn print_transfer(result: &TransferResult) {
        match result.action {
            TransferAction::Skipped => {
                println!("already in cloud: {}/{}", result.bucket, result.key)
            }
            TransferAction::Uploaded => println!(
                "uploaded {} to {}/{}",
                result.local_path, result.bucket, result.key
            ),
            TransferAction::Downloaded => println!(
                "downloaded {}/{} to {}",
                result.bucket, result.key, result.local_path
            ),
        }
    }

    pub fn print_check(result: &CheckResult) {
        let fields = result.record.fields();
        print!("{}", render_tsv(&FileRecord::HEADER, &[fields]));
    }

    pub fn print_export(result: &ExportResult) {
        println!("saved {} rows to {}", result.rows, result.outfile);
    }

    pub fn print_info(result: &InfoResult) {
        println!("config file: {}", result.config_path);
        println!();
        let rows = result
            .triples
            .iter()
            .map(FileTriple::fields)
            .collect::<Vec<_>>();
        print!("{}", render_tsv(&FileTriple::HEADER, &rows));
    }
}

impl ProgressSink for HumanOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}",
                event.message
            ),
            None => tracing::info!("{}", event.message),
        }
    }
}
