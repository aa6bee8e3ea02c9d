use clap::{Arg, ArgAction, Command};
use clap_num::maybe_hex;
use log::{error, info};
use std::path::Path;

fn main() {
    let matches = Command::new("exhume_jffs2")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Exhume the directory tree and file contents from a JFFS2 flash image.")
        .arg(
            Arg::new("filesystem")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("The path to the JFFS2 image to exhume."),
        )
        .arg(
            Arg::new("dest")
                .short('d')
                .long("dest")
                .value_parser(clap::value_parser!(String))
                .default_value("jffs2-root")
                .help("Destination directory for the extracted trees."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .default_value("0")
                .help("Start scanning at this byte offset into the image."),
        )
        .arg(
            Arg::new("force")
                .short('f')
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Extract even if the destination directory already exists."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the scanned node catalogue as JSON."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count),
        )
        .get_matches();

    let file_path = matches.get_one::<String>("filesystem").unwrap();
    let dest = matches.get_one::<String>("dest").unwrap();
    let offset = *matches.get_one::<u64>("offset").unwrap() as usize;
    let verbose = matches.get_count("verbose");
    let force = match matches.get_one::<bool>("force") {
        Some(force) => *force,
        None => false,
    };
    let json = match matches.get_one::<bool>("json") {
        Some(json) => *json,
        None => false,
    };

    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .target(env_logger::Target::Stdout)
        .init();

    let dest = Path::new(dest);
    if dest.exists() && !force {
        error!(
            "destination '{}' already exists, pass --force to extract into it anyway",
            dest.display()
        );
        std::process::exit(1);
    }

    let image = match std::fs::read(file_path) {
        Ok(image) => image,
        Err(message) => {
            error!("cannot open '{}': {}", file_path, message);
            std::process::exit(1);
        }
    };
    if offset > image.len() {
        error!(
            "offset 0x{:x} is past the end of the image ({} bytes)",
            offset,
            image.len()
        );
        std::process::exit(1);
    }

    match exhume_jffs2::extract_image(&image[offset..], dest, verbose, json) {
        Ok(count) => info!("extracted {} filesystem(s) into {}", count, dest.display()),
        Err(message) => {
            error!("{}", message);
            std::process::exit(1);
        }
    }
}
