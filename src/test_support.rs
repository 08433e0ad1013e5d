use axum::Router;
use tokio::net::TcpListener;
use url::Url;

/// Serves `router` on an ephemeral local port and returns its base url.
pub(crate) async fn serve(router: Router) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    Url::parse(&format!("http://{address}/")).unwrap()
}
