use docker_squash::docker::squash::{squash, SquashOptions};
use docker_squash::{cli::*, SquashError};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::process;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<(), SquashError> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Squash {
            input,
            output,
            from,
            tag,
            temp_dir,
            verbose,
        } => {
            init_logging(verbose);

            let options = SquashOptions {
                from: from.unwrap_or_default(),
                tags: parse_tags(&tag)?,
                temp_dir,
            };

            let source: Box<dyn Read> = match &input {
                Some(path) => Box::new(File::open(path)?),
                None => Box::new(io::stdin()),
            };
            let source = decompressed(BufReader::new(source))?;

            let sink: Box<dyn Write> = match &output {
                Some(path) => Box::new(File::create(path)?),
                None => Box::new(io::stdout()),
            };
            let mut sink = BufWriter::new(sink);

            let mut image_id = Vec::new();
            squash(source, &mut sink, &mut image_id, &options)?;
            sink.flush()?;

            // stdout may carry the archive, so the id goes to stderr
            eprintln!("{}", String::from_utf8_lossy(&image_id));
        }
    }

    Ok(())
}

/// Saved images are often stored gzipped; sniff the magic bytes so both
/// forms work, whether read from a file or from stdin.
fn decompressed(mut reader: BufReader<Box<dyn Read>>) -> Result<Box<dyn Read>, SquashError> {
    let head = reader.fill_buf()?;
    if head.starts_with(&[0x1f, 0x8b]) {
        Ok(Box::new(GzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "docker_squash=debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
