use crate::models::{LoginForm, SecretRecord};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::new_secret,
        crate::routes::save_secret,
        crate::routes::delete_secret,
        crate::routes::list_ids,
        crate::routes::verify_code,
        crate::routes::reload_secrets,
        crate::routes::login,
        crate::routes::verify_session,
        crate::routes::verify_token,
        crate::routes::logout,
    ),
    components(schemas(SecretRecord, LoginForm)),
    tags(
        (name = "totp", description = "Secret lifecycle and one-shot code checks"),
        (name = "auth", description = "Session login, verification and logout"),
    )
)]
pub struct ApiDoc;
