fn main() {
    if let Err(e) = lagcam_lib::run() {
        eprintln!("lagcam: {:#}", e);
        std::process::exit(1);
    }
}
