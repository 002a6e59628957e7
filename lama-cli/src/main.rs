//! Lama bytecode runner.
//!
//! `lamai <bytecode-file>` loads the image, verifies it, and interprets
//! it. Verification and interpretation wall times go to stderr so timing
//! a program does not disturb its output.
//!
//! Exit codes:
//! - 0: success
//! - 1: usage or read error
//! - 2: invalid bytefile (format or verification failure)
//! - 3: runtime error

use std::process;
use std::time::Instant;

use lama_common::ByteFile;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: lamai <bytecode-file>");
        process::exit(1);
    }
    let path = &args[1];

    let start = Instant::now();
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("failed to read bytecode from {path}: {e}");
            process::exit(1);
        }
    };

    let mut file = match ByteFile::from_bytes(&bytes) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("invalid bytefile at {path}:");
            eprintln!("{e}");
            process::exit(2);
        }
    };

    if let Err(e) = lama_verifier::verify(&mut file) {
        eprintln!("invalid bytefile at {path}:");
        eprintln!("{e}");
        process::exit(2);
    }
    eprintln!("finished verification");
    let verified = Instant::now();

    if let Err(e) = lama_vm::interpret(&file) {
        eprintln!("{e}");
        process::exit(3);
    }
    let finished = Instant::now();

    eprintln!("verification time: {:?}", verified - start);
    eprintln!("interpretation time: {:?}", finished - verified);
}
