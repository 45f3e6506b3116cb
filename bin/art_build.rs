//! Build an ART index from tab-separated `key<TAB>value` lines and write it
//! out as a framed file (`header::write` over the tree's raw stream bytes).

use std::error::Error;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

#[macro_use]
extern crate structopt;

use structopt::StructOpt;

use artstream::header::HeaderDescr;
use artstream::node::Constants;
use artstream::stream::MemStream;
use artstream::ArtTree;

#[derive(Debug, StructOpt)]
#[structopt(name = "art_build", about = "Build an ART index from tab-separated input")]
struct CommandLineArgs {
    #[structopt(parse(from_os_str))]
    input_filename: PathBuf,

    #[structopt(parse(from_os_str))]
    output_filename: PathBuf,
}

fn main() -> Result<(), Box<dyn Error + 'static>> {
    env_logger::init();
    let opts = CommandLineArgs::from_args();

    let c = Constants::default();
    let mut tree: ArtTree<Vec<u8>, Vec<u8>, MemStream, artstream::codec::BytesCodec, artstream::codec::BytesCodec> =
        ArtTree::create(MemStream::new(), c);

    let input = fs::File::open(&opts.input_filename)?;
    let mut line_count = 0u64;
    for line in BufReader::new(input).lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(2, '\t');
        let key = parts.next().ok_or("missing key column")?;
        let value = parts.next().ok_or("missing value column")?;
        tree.set(&key.as_bytes().to_vec(), &value.as_bytes().to_vec())?;
        line_count += 1;
    }
    log::info!("art_build: inserted {line_count} entries");

    let item_count = tree.count();
    let body = tree.into_stream().into_inner();
    let descr = HeaderDescr::new(chrono::Utc::now().to_rfc3339(), item_count, &c);
    let framed = artstream::header::write(&descr, &body)?;
    fs::write(&opts.output_filename, framed)?;

    Ok(())
}
