//! Build an ART index from a JSON array of `{"key": ..., "value": ...}`
//! objects (string key/value pairs), the JSON-driven counterpart to
//! `art_build`'s tab-separated input.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

#[macro_use]
extern crate structopt;

use serde::Deserialize;
use structopt::StructOpt;

use artstream::header::HeaderDescr;
use artstream::node::Constants;
use artstream::stream::MemStream;
use artstream::ArtTree;

#[derive(Debug, Deserialize)]
struct Entry {
    key: String,
    value: String,
}

#[derive(Debug, StructOpt)]
#[structopt(name = "art_import_json", about = "Build an ART index from a JSON array of key/value entries")]
struct CommandLineArgs {
    #[structopt(parse(from_os_str))]
    input_filename: PathBuf,

    #[structopt(parse(from_os_str))]
    output_filename: PathBuf,
}

fn main() -> Result<(), Box<dyn Error + 'static>> {
    env_logger::init();
    let opts = CommandLineArgs::from_args();

    let data = fs::read(&opts.input_filename)?;
    let entries: Vec<Entry> = serde_json::from_slice(&data)?;

    let c = Constants::default();
    let mut tree: ArtTree<Vec<u8>, Vec<u8>, MemStream, artstream::codec::BytesCodec, artstream::codec::BytesCodec> =
        ArtTree::create(MemStream::new(), c);
    for entry in &entries {
        tree.set(&entry.key.clone().into_bytes(), &entry.value.clone().into_bytes())?;
    }
    log::info!("art_import_json: inserted {} entries", entries.len());

    let item_count = tree.count();
    let body = tree.into_stream().into_inner();
    let descr = HeaderDescr::new(chrono::Utc::now().to_rfc3339(), item_count, &c);
    let framed = artstream::header::write(&descr, &body)?;
    fs::write(&opts.output_filename, framed)?;

    Ok(())
}
