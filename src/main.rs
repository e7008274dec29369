fn main() {
    if let Err(e) = mcc::driver::run() {
        eprintln!("mcc: error: {}", e);
        std::process::exit(1);
    }
}
