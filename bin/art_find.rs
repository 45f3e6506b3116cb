//! Query an ART index file through the various lookup façades.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

#[macro_use]
extern crate structopt;

use structopt::StructOpt;

use artstream::query::{MatchMode, RangeMode};
use artstream::stream::MemStream;
use artstream::ArtTree;

type BytesTree = ArtTree<Vec<u8>, Vec<u8>, MemStream, artstream::codec::BytesCodec, artstream::codec::BytesCodec>;

#[derive(Debug, StructOpt)]
#[structopt(name = "art_find", about = "Query an ART index file")]
struct CommandLineArgs {
    #[structopt(parse(from_os_str))]
    input_filename: PathBuf,

    #[structopt(subcommand)]
    query: Query,
}

#[derive(Debug, StructOpt)]
enum Query {
    /// Every key with the given byte prefix.
    StartsWith { prefix: String },
    /// Every key matching a `.`-as-wildcard fixed-length pattern.
    Wildcard { pattern: String },
    /// Every key matching a small regexp subset (literals, `[...]`, `[*]`).
    Regexp { pattern: String },
    /// Every key within `hamming` substitutions of `pattern`.
    NearNeighbors {
        pattern: String,
        #[structopt(long, default_value = "1")]
        hamming: i64,
        #[structopt(long, default_value = "1")]
        cost_missing: i64,
        #[structopt(long, default_value = "1")]
        cost_extra: i64,
    },
    /// Every key in `[start, end]`; either bound may be omitted.
    Range {
        #[structopt(long)]
        start: Option<String>,
        #[structopt(long)]
        end: Option<String>,
    },
}

fn print_hits(hits: Vec<(Vec<u8>, Vec<u8>)>) {
    for (k, v) in hits {
        println!("{}\t{}", String::from_utf8_lossy(&k), String::from_utf8_lossy(&v));
    }
}

fn main() -> Result<(), Box<dyn Error + 'static>> {
    env_logger::init();
    let opts = CommandLineArgs::from_args();

    let data = fs::read(&opts.input_filename)?;
    let (descr, body) = artstream::header::read(&data, true)?;
    let tree: BytesTree = ArtTree::reload(MemStream::from_vec(body.to_vec()), descr.constants())?;

    match opts.query {
        Query::StartsWith { prefix } => print_hits(tree.starts_with(&prefix.into_bytes())?),
        Query::Wildcard { pattern } => {
            print_hits(tree.partial_match(pattern.as_bytes(), b'.', MatchMode::Exact)?)
        }
        Query::Regexp { pattern } => print_hits(tree.regexp_match(&pattern, MatchMode::Exact)?),
        Query::NearNeighbors {
            pattern,
            hamming,
            cost_missing,
            cost_extra,
        } => print_hits(tree.regexp_near_neighbors(&pattern, hamming, cost_missing, cost_extra)?),
        Query::Range { start, end } => print_hits(tree.range(
            start.map(|s| s.into_bytes()).as_ref(),
            end.map(|s| s.into_bytes()).as_ref(),
            RangeMode::Alphabetical,
        )?),
    }

    Ok(())
}
