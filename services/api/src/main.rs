use verifly_api::run;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("verifly error: {err}");
        std::process::exit(1);
    }
}
