use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use operator::{
    self, cert_controller, gateway_controller, issuer_controller, solver_controller, telemetry,
};

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<cert_controller::State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    // Initialize Kubernetes controller state
    let cert_state = cert_controller::State::default();
    let solver_state = solver_controller::State::default();
    let gateway_state = gateway_controller::State::default();
    let issuer_state = issuer_controller::State::default();

    let cert_ctrl = cert_controller::run_cert(cert_state.clone());
    let solver_ctrl = solver_controller::run_solver(solver_state.clone());
    let gateway_ctrl = gateway_controller::run_gateway(gateway_state.clone());
    let issuer_ctrl = issuer_controller::run_issuer(issuer_state.clone());

    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(cert_state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
    })
    .bind("0.0.0.0:8080")?
    .shutdown_timeout(5);

    // All runtimes implement graceful shutdown, so poll until all are done
    let (_, _, _, _, server_result) = tokio::join!(
        cert_ctrl,
        solver_ctrl,
        gateway_ctrl,
        issuer_ctrl,
        server.run()
    );
    server_result?;
    Ok(())
}
