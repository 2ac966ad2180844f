// 认证模块 - Google 服务账号 OAuth2 access token

pub mod google;

pub use google::{
    AccessTokenSource, ServiceAccountKey, ServiceAccountTokenSource, StaticTokenSource,
    SCOPE_DATASTORE, SCOPE_FIREBASE_MESSAGING,
};
