//! Compact an ART index file in place: reload it, copy every reachable node
//! into a fresh stream with `optimise`, then reload and re-frame the result.
//! Written to a temp file and renamed over the original so a crash midway
//! never leaves a half-written index behind.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

#[macro_use]
extern crate structopt;

use structopt::StructOpt;

use artstream::header::HeaderDescr;
use artstream::stream::{MemStream, Stream};

#[derive(Debug, StructOpt)]
#[structopt(name = "art_optimise", about = "Compact an ART index file")]
struct CommandLineArgs {
    #[structopt(parse(from_os_str))]
    input_filename: PathBuf,
}

fn main() -> Result<(), Box<dyn Error + 'static>> {
    env_logger::init();
    let opts = CommandLineArgs::from_args();

    let data = fs::read(&opts.input_filename)?;
    let (old_descr, body) = artstream::header::read(&data, true)?;
    let c = old_descr.constants();
    let src = MemStream::from_vec(body.to_vec());

    let mut dst = MemStream::new();
    artstream::optimise::optimise(&src, &c, &mut dst)?;
    let (_store, item_count) = artstream::optimise::reload(&dst, &c)?;
    log::info!(
        "art_optimise: {} -> {} bytes, {item_count} item(s)",
        body.len(),
        dst.len()
    );

    let new_descr = HeaderDescr::new(chrono::Utc::now().to_rfc3339(), item_count, &c);
    let framed = artstream::header::write(&new_descr, &dst.into_inner())?;

    let tmp_path = opts.input_filename.with_extension("art.tmp");
    fs::write(&tmp_path, framed)?;
    fs::rename(&tmp_path, &opts.input_filename)?;

    Ok(())
}
