fn main() {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .try_init();
    if let Err(err) = maplabel_engine::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
