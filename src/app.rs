use crate::{
    alert::AlertHub,
    api, overlay,
    reconcile::{SharedGateway, WebhookAuth},
    setting::Setting,
    Error, Result, Service,
};
use actix_cors::Cors;
use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest},
    middleware, web, App as WebApp, HttpServer,
};
use paylabs_client::{notify_url, Paylabs, PaylabsConfig, Signer, Verifier};
use sea_orm::{ConnectOptions, Database, DbConn};
use std::{path::Path, sync::Arc};
use tracing::{info, warn};

pub struct AppState {
    pub service: Service,
    pub setting: Setting,
}

impl AppState {
    pub async fn create<P: AsRef<Path>>(
        setting_path: Option<P>,
        setting_env_prefix: Option<String>,
    ) -> Result<Self> {
        let env_notice = setting_env_prefix
            .as_ref()
            .map(|s| {
                format!(
                    ", config will be overrided by ENV seting with prefix `{}_`",
                    s
                )
            })
            .unwrap_or_default();

        let setting = if let Some(path) = setting_path {
            info!("Load config {:?}{}", path.as_ref(), env_notice);
            Setting::read(path.as_ref(), setting_env_prefix)?
        } else if let Some(prefix) = setting_env_prefix {
            info!("Load default config{}", env_notice);
            Setting::from_env(prefix)?
        } else {
            info!("Load default config");
            Setting::default()
        };

        info!("{:?}", setting);

        Self::from_setting(setting).await
    }

    /// Connect the database and the Paylabs client. Fails on missing or bad keys.
    pub async fn from_setting(setting: Setting) -> Result<Self> {
        let material = setting
            .paylabs
            .private_key_material()?
            .ok_or(Error::Str("Need config paylabs.private_key"))?;
        let signer = Signer::from_material(&material)?;
        let config = PaylabsConfig {
            api_url: setting.paylabs.api_url.clone(),
            merchant_id: setting.paylabs.merchant_id.clone(),
            notify_url: notify_url(&setting.site(), &setting.paylabs.webhook_path),
            timeout: setting.paylabs.timeout(),
        };
        if config.notify_url.is_none() {
            info!("Site is a loopback address, notify url disabled");
        }
        let gateway = Paylabs::new(config, signer)?;

        let mut options = ConnectOptions::from(&setting.db_url);
        options.sqlx_logging_level(tracing::log::LevelFilter::Trace);
        let conn = Database::connect(options).await?;

        Self::with_gateway(setting, conn, Arc::new(gateway))
    }

    pub fn with_gateway(setting: Setting, conn: DbConn, gateway: SharedGateway) -> Result<Self> {
        let auth = webhook_auth(&setting)?;
        let alerts = Arc::new(AlertHub::new(setting.alert.buffer));
        let service = Service::new(
            conn,
            gateway,
            alerts,
            auth,
            setting.paylabs.webhook_path.clone(),
            setting.donation.clone(),
        );
        Ok(Self { service, setting })
    }
}

fn webhook_auth(setting: &Setting) -> Result<WebhookAuth> {
    let material = setting.paylabs.public_key_material()?;
    Ok(match (setting.paylabs.verify_webhook, material) {
        (true, Some(key)) => WebhookAuth::Verify(Verifier::from_material(&key)?),
        (true, None) => {
            warn!("No paylabs.public_key configured, all webhooks will be rejected");
            WebhookAuth::Reject
        }
        (false, _) => {
            warn!("Webhook signature verification is disabled");
            WebhookAuth::Skip
        }
    })
}

pub fn create_web_app(
    data: web::Data<AppState>,
) -> WebApp<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = actix_web::dev::ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    let webhook_path = data.setting.paylabs.webhook_path.clone();
    WebApp::new()
        .app_data(data)
        .app_data(
            web::JsonConfig::default()
                .error_handler(|err, _req| Error::InvalidParam(err.to_string()).into()),
        )
        .wrap(middleware::Logger::default()) // enable logger
        .service(api::health)
        // before the api scope, the default path lives under it
        .route(&webhook_path, web::post().to(api::webhook))
        .service(api::scope())
        .service(
            overlay::scope().wrap(
                Cors::default()
                    .allow_any_header()
                    .allow_any_origin()
                    .allow_any_method()
                    .max_age(86_400),
            ),
        )
}

/// start app
pub async fn start(state: AppState) -> Result<()> {
    let state = web::Data::new(state);

    let c_data = state.clone();
    let server = HttpServer::new(move || create_web_app(c_data.clone()));
    let num = if state.setting.thread.http == 0 {
        num_cpus::get()
    } else {
        state.setting.thread.http
    };
    let host = state.setting.network.host.clone();
    let port = state.setting.network.port;
    info!("Start http server {}:{}", host, port);
    server.workers(num).bind((host, port))?.run().await?;
    Ok(())
}
