//! Loopback redirect hook for the installed-application flow.
use crate::secret::ApplicationSecret;
use log::{debug, warn};
use oauth2::{
    basic::{BasicClient, BasicErrorResponse},
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RequestTokenError, Scope, SyncHttpClient,
    TokenResponse, TokenUrl,
};
use std::{collections::HashMap, time::Duration};
use tiny_http::{Response, Server, StatusCode};
use url::Url;

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Shown in the browser once the redirect has been received.
const SUCCESS_MESSAGE: &str =
    "The authentication flow has completed. You may close this window.";

/// Hook errors for [`InstalledAppHook`]
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("cannot bind redirect server on {0}")]
    TinyHttpError(
        String,
        #[source] Box<dyn std::error::Error + Sync + Send + 'static>,
    ),
    #[error("redirect server is not listening on an ip address")]
    NotIpListener,
    #[error("cannot receive redirect request")]
    ReceiveError(#[source] std::io::Error),
    #[error("could not parse url")]
    UrlParseError(#[from] url::ParseError),
    #[error("failed to do IO operation")]
    IoError(#[from] std::io::Error),
    #[error("authorization was denied: {error} {description}")]
    Denied { error: String, description: String },
    #[error("state in redirect does not match the one sent with the authorization url")]
    StateMismatch,
    #[error("token endpoint rejected the code: {0}")]
    ExchangeRejected(BasicErrorResponse),
    #[error("cannot exchange code for access and refresh tokens")]
    ExchangeError(#[source] Box<dyn std::error::Error + 'static>),
}

/// Tokens returned by the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    /// Only issued for `access_type=offline` and, with Google, only on consent.
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
    /// Scopes granted, as reported by the token endpoint.
    pub scopes: Vec<String>,
}

/// Token generator using the [OAuth installed application flow](https://developers.google.com/identity/protocols/oauth2/native-app)
///
/// Binds a small webserver on construction that listens for the response from the user after
/// they are redirected to the loopback address by Google.
///
/// Make a new [`InstalledAppHook`] and call [`generate_url()`](InstalledAppHook::generate_url) and make the user navigate to the url.
/// Retrieve the tokens with [`receive_auth_token`](InstalledAppHook::receive_auth_token).
///
/// # Example
///
/// ```rust, no_run
/// use drive_refresh_token::{hook::InstalledAppHook, secret::ApplicationSecret};
///
/// let secret = ApplicationSecret::from_file("client_secret.json")?;
/// let hook = InstalledAppHook::new(
///     &secret,
///     ["https://www.googleapis.com/auth/drive.file"],
///     "localhost",
///     0,
/// )?;
///
/// let (url, _) = hook.generate_url();
/// give_url_to_user(url);
/// let credentials = hook.receive_auth_token(&reqwest::blocking::Client::new())?;
/// # fn give_url_to_user(_: impl std::any::Any ) {}
/// # Ok::<(), Box<dyn std::error::Error + 'static>>(())
/// ```
pub struct InstalledAppHook {
    client: GoogleClient,
    server: Server,
    redirect_url: Url,
    port: u16,
    scopes: Vec<Scope>,
    csrf_token: CsrfToken,
    pkce_challenge: PkceCodeChallenge,
    pkce_verifier: PkceCodeVerifier,
}

impl InstalledAppHook {
    /// Construct a new [`InstalledAppHook`], binding the redirect server on `host:port`.
    ///
    /// Port `0` lets the OS pick a free port; the redirect url uses the port actually bound.
    pub fn new<S>(
        secret: &ApplicationSecret,
        scopes: impl IntoIterator<Item = S>,
        host: &str,
        port: u16,
    ) -> Result<InstalledAppHook, HookError>
    where
        S: Into<String>,
    {
        let server = Server::http((host, port))
            .map_err(|e| HookError::TinyHttpError(format!("{host}:{port}"), e))?;
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or(HookError::NotIpListener)?;
        let redirect_url = Url::parse(&format!("http://{host}:{port}/"))?;
        debug!("redirect server listening on {}", redirect_url);

        let mut client = BasicClient::new(ClientId::new(secret.client_id.clone()))
            .set_auth_uri(AuthUrl::new(secret.auth_uri.clone())?)
            .set_token_uri(TokenUrl::new(secret.token_uri.clone())?)
            .set_redirect_uri(RedirectUrl::from_url(redirect_url.clone()));
        if let Some(client_secret) = &secret.client_secret {
            client = client.set_client_secret(ClientSecret::new(client_secret.clone()));
        }

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        Ok(InstalledAppHook {
            client,
            server,
            redirect_url,
            port,
            scopes: scopes.into_iter().map(|s| Scope::new(s.into())).collect(),
            csrf_token: CsrfToken::new_random(),
            pkce_challenge,
            pkce_verifier,
        })
    }

    /// Generate the url and csrf token associated with this [`InstalledAppHook`]
    ///
    /// The url asks for offline access and forces the consent screen, so that Google issues a
    /// refresh token even when the user has authorized the application before.
    pub fn generate_url(&self) -> (Url, CsrfToken) {
        let csrf_token = self.csrf_token.clone();
        self.client
            .authorize_url(move || csrf_token)
            .add_scopes(self.scopes.iter().cloned())
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(self.pkce_challenge.clone())
            .url()
    }

    /// Port the redirect server is bound to.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_uri(&self) -> &Url {
        &self.redirect_url
    }

    /// Wait for the redirect from the user's browser and exchange the received code.
    ///
    /// Blocks until a redirect carrying either a code or an error arrives. There is no timeout.
    pub fn receive_auth_token<C>(self, http_client: &C) -> Result<Credentials, HookError>
    where
        C: SyncHttpClient,
    {
        let code = loop {
            let rq = self.server.recv().map_err(HookError::ReceiveError)?;
            debug!("request: {:?}", rq);
            let url = self.redirect_url.join(rq.url())?;
            // Browsers also ask for things like /favicon.ico.
            if url.path() != self.redirect_url.path() {
                rq.respond(Response::from_string("KO").with_status_code(StatusCode(404)))?;
                continue;
            }

            let query: HashMap<_, _> = url.query_pairs().collect();

            if let Some(error) = query.get("error") {
                let error = error.to_string();
                let description = query
                    .get("error_description")
                    .map(|d| d.to_string())
                    .unwrap_or_default();
                rq.respond(
                    Response::from_string(format!("Error: {} - {}", error, description))
                        .with_status_code(StatusCode(400)),
                )?;
                return Err(HookError::Denied { error, description });
            }

            match (query.get("code"), query.get("state")) {
                (Some(code), Some(state)) => {
                    if *state != self.csrf_token.secret().as_str() {
                        rq.respond(Response::from_string("KO").with_status_code(StatusCode(400)))?;
                        return Err(HookError::StateMismatch);
                    }
                    rq.respond(Response::from_string(SUCCESS_MESSAGE))?;
                    break AuthorizationCode::new(code.to_string());
                }
                _ => {
                    rq.respond(Response::from_string("KO").with_status_code(StatusCode(400)))?;
                    continue;
                }
            }
        };

        let token = self
            .client
            .exchange_code(code)
            .set_pkce_verifier(self.pkce_verifier)
            .request(http_client)
            .map_err(|e| match e {
                RequestTokenError::ServerResponse(response) => HookError::ExchangeRejected(response),
                other => HookError::ExchangeError(Box::new(other)),
            })?;

        let scopes: Vec<String> = token
            .scopes()
            .map(|granted| granted.iter().map(|s| String::clone(s)).collect())
            .unwrap_or_default();
        if !scopes.is_empty() {
            let missing: Vec<&str> = self
                .scopes
                .iter()
                .map(|s| s.as_str())
                .filter(|requested| !scopes.iter().any(|granted| granted.as_str() == *requested))
                .collect();
            if !missing.is_empty() {
                warn!("scopes not granted: {}", missing.join(" "));
            }
        }

        Ok(Credentials {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_in: token.expires_in(),
            scopes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth2::{basic::BasicErrorResponseType, HttpRequest, HttpResponse};
    use std::{
        convert::Infallible,
        io::{Read, Write},
        net::TcpStream,
        sync::Mutex,
        thread,
    };

    const DRIVE_FILE: &str = "https://www.googleapis.com/auth/drive.file";

    fn secret() -> ApplicationSecret {
        ApplicationSecret {
            client_id: "1234.apps.googleusercontent.com".into(),
            client_secret: Some("GOCSPX-secret".into()),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".into(),
            token_uri: "https://oauth2.googleapis.com/token".into(),
            project_id: None,
            redirect_uris: vec!["http://localhost".into()],
        }
    }

    fn hook() -> InstalledAppHook {
        InstalledAppHook::new(&secret(), [DRIVE_FILE], "127.0.0.1", 0).unwrap()
    }

    /// Plays the browser following the redirect.
    fn browse(port: u16, path_and_query: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(
            stream,
            "GET {} HTTP/1.0\r\nHost: 127.0.0.1:{}\r\n\r\n",
            path_and_query, port
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    fn json_response(body: &str) -> HttpResponse {
        oauth2::http::Response::builder()
            .status(200)
            .header("content-type", "application/json")
            .body(body.as_bytes().to_vec())
            .unwrap()
    }

    #[test]
    fn url_requests_offline_access_and_consent() {
        let hook = hook();
        let (url, csrf) = hook.generate_url();
        let query: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(query["access_type"], "offline");
        assert_eq!(query["prompt"], "consent");
        assert_eq!(query["scope"], DRIVE_FILE);
        assert_eq!(query["response_type"], "code");
        assert_eq!(query["client_id"], "1234.apps.googleusercontent.com");
        assert_eq!(query["code_challenge_method"], "S256");
        assert!(!query["code_challenge"].is_empty());
        assert_eq!(&query["state"], csrf.secret());
        assert_eq!(
            query["redirect_uri"],
            format!("http://127.0.0.1:{}/", hook.port())
        );
    }

    #[test]
    fn port_zero_binds_an_ephemeral_port() {
        let hook = hook();
        assert_ne!(hook.port(), 0);
        assert_eq!(hook.redirect_uri().port(), Some(hook.port()));
    }

    #[test]
    fn exchanges_code_from_redirect() {
        let hook = hook();
        let port = hook.port();
        let (_, csrf) = hook.generate_url();
        let sent = Mutex::new(String::new());
        let token_endpoint = |request: HttpRequest| -> Result<HttpResponse, Infallible> {
            *sent.lock().unwrap() = String::from_utf8_lossy(request.body()).into_owned();
            Ok(json_response(
                r#"{"access_token":"ya29.a0","token_type":"Bearer","expires_in":3599,
                    "refresh_token":"1//0refresh","scope":"https://www.googleapis.com/auth/drive.file"}"#,
            ))
        };

        let state = csrf.secret().clone();
        let browser = thread::spawn(move || {
            let favicon = browse(port, "/favicon.ico");
            let redirect = browse(port, &format!("/?state={}&code=4%2Fabc&scope={}", state, DRIVE_FILE));
            (favicon, redirect)
        });

        let credentials = hook.receive_auth_token(&token_endpoint).unwrap();
        let (favicon, redirect) = browser.join().unwrap();

        assert!(favicon.starts_with("HTTP/1.0 404") || favicon.starts_with("HTTP/1.1 404"));
        assert!(redirect.contains(SUCCESS_MESSAGE));
        assert_eq!(credentials.access_token, "ya29.a0");
        assert_eq!(credentials.refresh_token.as_deref(), Some("1//0refresh"));
        assert_eq!(credentials.expires_in, Some(Duration::from_secs(3599)));
        assert_eq!(credentials.scopes, vec![DRIVE_FILE.to_string()]);

        let body = sent.lock().unwrap().clone();
        assert!(body.contains("grant_type=authorization_code"));
        assert!(body.contains("code=4%2Fabc"));
        assert!(body.contains("code_verifier="));
    }

    #[test]
    fn missing_refresh_token_is_not_an_error() {
        let hook = hook();
        let port = hook.port();
        let (_, csrf) = hook.generate_url();
        let token_endpoint = |_: HttpRequest| -> Result<HttpResponse, Infallible> {
            Ok(json_response(
                r#"{"access_token":"ya29.a0","token_type":"Bearer","expires_in":3599}"#,
            ))
        };

        let state = csrf.secret().clone();
        let browser = thread::spawn(move || browse(port, &format!("/?code=c&state={}", state)));

        let credentials = hook.receive_auth_token(&token_endpoint).unwrap();
        browser.join().unwrap();
        assert_eq!(credentials.refresh_token, None);
    }

    #[test]
    fn rejects_mismatched_state() {
        let hook = hook();
        let port = hook.port();
        let token_endpoint = |_: HttpRequest| -> Result<HttpResponse, Infallible> {
            panic!("code must not be exchanged")
        };

        let browser = thread::spawn(move || browse(port, "/?code=c&state=forged"));

        let err = hook.receive_auth_token(&token_endpoint).unwrap_err();
        let response = browser.join().unwrap();
        assert!(matches!(err, HookError::StateMismatch));
        assert!(response.contains(" 400 "));
    }

    #[test]
    fn user_denial_aborts() {
        let hook = hook();
        let port = hook.port();
        let token_endpoint = |_: HttpRequest| -> Result<HttpResponse, Infallible> {
            panic!("code must not be exchanged")
        };

        let browser = thread::spawn(move || {
            browse(port, "/?error=access_denied&error_description=denied%20by%20user")
        });

        let err = hook.receive_auth_token(&token_endpoint).unwrap_err();
        let response = browser.join().unwrap();
        assert!(response.contains("Error: access_denied - denied by user"));
        match err {
            HookError::Denied { error, description } => {
                assert_eq!(error, "access_denied");
                assert_eq!(description, "denied by user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn token_endpoint_rejection_is_reported() {
        let hook = hook();
        let port = hook.port();
        let (_, csrf) = hook.generate_url();
        let token_endpoint = |_: HttpRequest| -> Result<HttpResponse, Infallible> {
            Ok(oauth2::http::Response::builder()
                .status(400)
                .header("content-type", "application/json")
                .body(br#"{"error":"invalid_grant","error_description":"Bad Request"}"#.to_vec())
                .unwrap())
        };

        let state = csrf.secret().clone();
        let browser = thread::spawn(move || browse(port, &format!("/?code=c&state={}", state)));

        let err = hook.receive_auth_token(&token_endpoint).unwrap_err();
        browser.join().unwrap();
        match &err {
            HookError::ExchangeRejected(response) => {
                assert_eq!(response.error(), &BasicErrorResponseType::InvalidGrant);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[test]
    fn transport_failure_keeps_its_cause() {
        let hook = hook();
        let port = hook.port();
        let (_, csrf) = hook.generate_url();
        let token_endpoint = |_: HttpRequest| -> Result<HttpResponse, std::io::Error> {
            Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))
        };

        let state = csrf.secret().clone();
        let browser = thread::spawn(move || browse(port, &format!("/?code=c&state={}", state)));

        let err = hook.receive_auth_token(&token_endpoint).unwrap_err();
        browser.join().unwrap();
        assert!(matches!(err, HookError::ExchangeError(_)));

        let mut causes = Vec::new();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            causes.push(cause.to_string());
            source = cause.source();
        }
        assert!(causes.iter().any(|c| c == "connection reset by peer"));
    }
}
