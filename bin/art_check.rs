//! Verify an ART index file's checksum and print its descriptor.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

#[macro_use]
extern crate structopt;

use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "art_check", about = "Verify an ART index file and print its header")]
struct CommandLineArgs {
    #[structopt(parse(from_os_str))]
    input_filename: PathBuf,

    #[structopt(long, help = "Skip SHA-256 verification")]
    skip_checksum: bool,
}

fn main() -> Result<(), Box<dyn Error + 'static>> {
    env_logger::init();
    let opts = CommandLineArgs::from_args();

    let data = fs::read(&opts.input_filename)?;
    let (descr, body) = artstream::header::read(&data, !opts.skip_checksum)?;

    println!("Created-On:    {}", descr.created_on);
    println!("Item-Count:    {}", descr.item_count);
    println!("P (ptr width): {}", descr.p);
    println!("L (max pfx):   {}", descr.l);
    println!("Terminator:    {:#04x}", descr.terminator);
    println!("Escape-Lead:   {:#04x}", descr.escape_lead);
    println!("Escape-Follow: {:#04x}", descr.escape_follow);
    println!("Body bytes:    {}", body.len());

    Ok(())
}
