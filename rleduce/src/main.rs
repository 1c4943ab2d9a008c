mod fork;
mod pict;

use std::path::{Path, PathBuf};

use clap::Parser;

use rled_core::pipeline::{process_container, Options};

use crate::fork::{ContainerFormat, ResourceFile};
use crate::pict::QuickDrawCodec;

#[derive(Parser)]
#[command(
    name = "rleduce",
    about = "Optimize the size of rlëD and PICT resources in resource files"
)]
struct Cli {
    /// Normalize PICTs by rewriting them in a standard format
    #[arg(short, long)]
    picts: bool,

    /// Reduce PICT depth to 16-bit (smaller output; implies --picts)
    #[arg(short, long)]
    reduce: bool,

    /// Encode rlëDs from spïns/shäns with PICTs
    #[arg(short, long)]
    encode: bool,

    /// Don't dither when reducing to 16-bit (applies to --reduce and --encode)
    #[arg(short = 'n', long)]
    no_dither: bool,

    /// Allow rlëD frame height trimming (not recommended)
    #[arg(short, long)]
    trim: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Output file or directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Resource files to process
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::try_parse().unwrap_or_else(|err| {
        let _ = err.print();
        std::process::exit(if err.use_stderr() { 1 } else { 0 });
    });

    let options = Options {
        trim: cli.trim,
        picts: cli.picts || cli.reduce,
        reduce: cli.reduce,
        encode: cli.encode,
        dither: !cli.no_dither,
        verbose: cli.verbose,
    };

    let mut outdir = false;
    if let Some(output) = &cli.output {
        if output.is_dir() {
            outdir = true;
        } else if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                eprintln!("Output directory {} does not exist.", parent.display());
                std::process::exit(1);
            }
        }
    }

    for file in &cli.files {
        let outpath = cli.output.as_ref().map(|output| {
            if outdir {
                match file.file_name() {
                    Some(name) => output.join(name),
                    None => output.clone(),
                }
            } else {
                output.clone()
            }
        });
        if let Err(err) = process_file(file, outpath.as_deref(), &options) {
            eprintln!("{}: {}", file.display(), err);
        }
    }
}

fn process_file(path: &Path, outpath: Option<&Path>, options: &Options) -> anyhow::Result<()> {
    let mut file = ResourceFile::open(path)?;
    match path.file_name() {
        Some(name) => println!("Processing {}...", name.to_string_lossy()),
        None => println!("Processing {}...", path.display()),
    }

    let report = process_container(&mut file, &QuickDrawCodec, options);

    // Don't rewrite the file if nothing changed and no output path was given.
    if !report.changed() && outpath.is_none() {
        println!("No changes written.");
        return Ok(());
    }

    let mut format = file.current_format();
    let target = outpath.unwrap_or(path);
    if outpath.is_some() {
        match target.extension().and_then(|e| e.to_str()) {
            Some("rez") => format = ContainerFormat::Rez,
            Some("ndat") | Some("npif") | Some("rsrc") => format = ContainerFormat::Classic,
            _ => {}
        }
    }
    file.write(target, format)
}
