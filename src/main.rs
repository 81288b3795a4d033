#[actix_web::main]
async fn main() {
    if let Err(e) = wardroute_lib::run().await {
        eprintln!("wardroute: {}", e);
        std::process::exit(1);
    }
}
