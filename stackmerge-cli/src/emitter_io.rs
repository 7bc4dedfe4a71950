//! Reading and writing serialized emitters.

use std::io::{Read, Write};

use clio::{Input, Output};
use stackmerge_core::Emitter;

use crate::CliError;

/// Reads a JSON encoded emitter.
pub fn read_emitter(input: &mut Input) -> Result<Emitter, CliError> {
    read_emitter_from(input)
}

/// Reads a JSON encoded emitter from any reader.
pub fn read_emitter_from(reader: impl Read) -> Result<Emitter, CliError> {
    Ok(serde_json::from_reader(reader)?)
}

/// Writes an emitter as pretty printed JSON.
pub fn write_emitter(output: &mut Output, emitter: &Emitter) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *output, emitter)?;
    writeln!(output)?;
    Ok(())
}
