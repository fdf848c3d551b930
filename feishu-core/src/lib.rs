mod client;
mod oauth;

pub use client::{
    ApiEnvelope, ApiRequest, ApiResponse, DriveFile, FeishuClient, FeishuError, FileList,
    FolderMeta, MAX_PAGE_SIZE, ShortcutInfo, first_string,
};
pub use oauth::{DEFAULT_SCOPE, OAuthClient, OAuthError, OAuthToken};
