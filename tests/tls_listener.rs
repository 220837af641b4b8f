// Tests for the TLS server started next to the plain HTTP server
#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use axum::http::StatusCode;
    use base64::{Engine, engine::general_purpose::STANDARD};
    use httplistener::{ExecutionContext, HttpListener, LifecycleState, config::ListenerOptions};

    fn free_port() -> u16 {
        let socket = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap().port()
    }

    fn self_signed() -> (String, String) {
        let generated =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (
            STANDARD.encode(generated.cert.pem()),
            STANDARD.encode(generated.signing_key.serialize_pem()),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_https_and_http_served_together() {
        let (http_port, tls_port) = (free_port(), free_port());
        let (certificate, private_key) = self_signed();
        let options = ListenerOptions::default()
            .with_bind_address("127.0.0.1")
            .with_http_port(http_port.to_string())
            .with_tls(tls_port.to_string(), certificate, private_key);

        let mut listener = HttpListener::new(options, Arc::new(ExecutionContext::new()));
        listener.add_health_check().unwrap();
        let handle = listener.shutdown_handle();
        let mut state = listener.state_watch();
        let task = tokio::spawn(async move { listener.start().await });
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == LifecycleState::Running),
        )
        .await
        .unwrap()
        .unwrap();

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap();

        let https = client
            .get(format!("https://127.0.0.1:{tls_port}/health/probe"))
            .send()
            .await
            .unwrap();
        assert_eq!(https.status(), StatusCode::OK);

        let http = client
            .get(format!("http://127.0.0.1:{http_port}/health/probe"))
            .send()
            .await
            .unwrap();
        assert_eq!(http.status(), StatusCode::OK);

        handle.request_shutdown("test");
        tokio::time::timeout(Duration::from_secs(15), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_tls_material_keeps_http_running() {
        let http_port = free_port();
        let options = ListenerOptions::default()
            .with_bind_address("127.0.0.1")
            .with_http_port(http_port.to_string())
            .with_tls(
                free_port().to_string(),
                STANDARD.encode("not a certificate"),
                STANDARD.encode("not a key"),
            );

        let mut listener = HttpListener::new(options, Arc::new(ExecutionContext::new()));
        listener.add_health_check().unwrap();
        let handle = listener.shutdown_handle();
        let mut state = listener.state_watch();
        let task = tokio::spawn(async move { listener.start().await });
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == LifecycleState::Running),
        )
        .await
        .unwrap()
        .unwrap();

        let response = reqwest::get(format!("http://127.0.0.1:{http_port}/health/probe"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        handle.request_shutdown("test");
        task.await.unwrap().unwrap();
    }
}
