fn main() {
    if let Err(err) = booktrade_ingest::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
