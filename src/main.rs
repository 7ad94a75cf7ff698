// Copyright 2023 Meta Platforms, Inc. and affiliates.
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::process;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use log::info;
use vfrcc::ifr::builder::Builder;
use vfrcc::ifr::builder::VfrFrontend;
use vfrcc::ifr::serialize;
use vfrcc::ProgramFrontend;

#[derive(Debug, Parser)]
#[clap(name = "vfrcc", about = "UEFI HII IFR form package builder", long_about = None)]
struct VfrccArgs {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build an IFR form package from a structured op-list document
    Compile {
        /// Path to a JSON document deserializing to a list of builder ops
        #[clap(parse(from_os_str))]
        input: PathBuf,
        /// Write the raw binary package here
        #[clap(long = "out-hpk", parse(from_os_str))]
        out_hpk: Option<PathBuf>,
        /// Write a `.c` byte-array rendering here
        #[clap(long = "out-c", parse(from_os_str))]
        out_c: Option<PathBuf>,
        /// Write a `.lst` source-interleaved listing here
        #[clap(long = "out-lst", parse(from_os_str))]
        out_lst: Option<PathBuf>,
        /// Run the framework-compatibility record-list adjustments
        #[clap(long = "compat", action)]
        compat: bool,
        /// Symbol name used in `.c` output
        #[clap(long = "symbol", default_value = "gFormBin")]
        symbol: String,
        /// Fail the compile if any non-fatal diagnostic was reported
        #[clap(long = "warnings-as-errors", action)]
        warnings_as_errors: bool,
        /// Disable the RecordLog (also skips default-synthesis, compat-mode
        /// relocation, and the end-of-build consistency check)
        #[clap(long = "no-record-log", action)]
        no_record_log: bool,
    },
    /// Build the package and print the `.lst` listing to stdout
    ShowRecords {
        #[clap(parse(from_os_str))]
        input: PathBuf,
        #[clap(long = "compat", action)]
        compat: bool,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let args = VfrccArgs::parse();

    if let Err(why) = handle_cmds(args) {
        eprintln!("error: {why:#}");
        process::exit(1);
    }

    info!("Exiting vfrcc");
    Ok(())
}

fn handle_cmds(args: VfrccArgs) -> Result<()> {
    match args.command {
        Commands::Compile {
            input,
            out_hpk,
            out_c,
            out_lst,
            compat,
            symbol,
            warnings_as_errors,
            no_record_log,
        } => {
            let record_log = out_lst.is_some() || !no_record_log;
            let (builder, pkg) = compile(&input, compat, record_log, warnings_as_errors)?;

            if let Some(path) = out_hpk {
                let mut f = File::create(&path).context("creating --out-hpk file")?;
                f.write_all(&pkg)?;
            }
            if let Some(path) = out_c {
                let rendered = serialize::render_c_array(&builder.buffer, &symbol);
                fs::write(&path, rendered).context("writing --out-c file")?;
            }
            if let Some(path) = out_lst {
                let rendered = serialize::render_listing(&builder.buffer, &builder.log, &builder.line_map);
                fs::write(&path, rendered).context("writing --out-lst file")?;
            }
        }
        Commands::ShowRecords { input, compat } => {
            let (builder, _pkg) = compile(&input, compat, true, false)?;
            println!(
                "{}",
                serialize::render_listing(&builder.buffer, &builder.log, &builder.line_map)
            );
        }
    }
    Ok(())
}

fn compile(
    input: &PathBuf,
    compat: bool,
    record_log: bool,
    warnings_as_errors: bool,
) -> Result<(Builder, Vec<u8>)> {
    let text = fs::read_to_string(input).context("reading input op-list")?;
    let frontend = ProgramFrontend::from_json(&text).context("parsing op-list")?;
    let mut builder = Builder::new(compat, record_log);
    builder.warnings_as_errors = warnings_as_errors;
    frontend.drive(&mut builder)?;
    let pkg = builder.finish()?;
    Ok((builder, pkg))
}
