#[rocket::launch]
fn rocket() -> _ {
    let rocket = hamba::rocket();
    log::info!("starting hamba API server");
    rocket
}
