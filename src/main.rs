#[tokio::main]
async fn main() {
    if let Err(err) = testlens_lib::run().await {
        eprintln!("testlens: {err}");
        std::process::exit(1);
    }
}
