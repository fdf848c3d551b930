//! The remote surface the migration engine drives.
//!
//! Every call returns the normalized [`ApiEnvelope`]; a transport-level
//! failure (no response at all) surfaces as [`FeishuError`].

use feishu_core::{ApiEnvelope, FeishuClient, FeishuError};

#[allow(async_fn_in_trait)]
pub trait DriveApi {
    async fn root_folder_meta(&self) -> Result<ApiEnvelope, FeishuError>;

    async fn folder_meta(&self, folder_token: &str) -> Result<ApiEnvelope, FeishuError>;

    async fn list_folder(
        &self,
        folder_token: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError>;

    async fn create_folder(&self, name: &str, parent_token: &str)
    -> Result<ApiEnvelope, FeishuError>;

    async fn copy_file(
        &self,
        file_token: &str,
        name: &str,
        obj_type: &str,
        folder_token: &str,
    ) -> Result<ApiEnvelope, FeishuError>;

    async fn check_copy_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError>;

    async fn create_wiki_space(&self, name: &str) -> Result<ApiEnvelope, FeishuError>;

    async fn create_wiki_node(
        &self,
        space_id: &str,
        title: &str,
        parent_node_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError>;

    async fn move_docs_to_wiki(
        &self,
        space_id: &str,
        obj_type: &str,
        obj_token: &str,
        parent_wiki_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError>;

    async fn get_wiki_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError>;
}

const WIKI_MOVE_TASK_TYPE: &str = "move";

impl DriveApi for FeishuClient {
    async fn root_folder_meta(&self) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::root_folder_meta(self).await
    }

    async fn folder_meta(&self, folder_token: &str) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::folder_meta(self, folder_token).await
    }

    async fn list_folder(
        &self,
        folder_token: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::list_folder(self, folder_token, page_size, page_token).await
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_token: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::create_folder(self, name, parent_token).await
    }

    async fn copy_file(
        &self,
        file_token: &str,
        name: &str,
        obj_type: &str,
        folder_token: &str,
    ) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::copy_file(self, file_token, name, obj_type, folder_token).await
    }

    async fn check_copy_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::check_copy_task(self, task_id).await
    }

    async fn create_wiki_space(&self, name: &str) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::create_wiki_space(self, name, None).await
    }

    async fn create_wiki_node(
        &self,
        space_id: &str,
        title: &str,
        parent_node_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::create_wiki_node(self, space_id, title, parent_node_token).await
    }

    async fn move_docs_to_wiki(
        &self,
        space_id: &str,
        obj_type: &str,
        obj_token: &str,
        parent_wiki_token: Option<&str>,
    ) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::move_docs_to_wiki(self, space_id, obj_type, obj_token, parent_wiki_token, true)
            .await
    }

    async fn get_wiki_task(&self, task_id: &str) -> Result<ApiEnvelope, FeishuError> {
        FeishuClient::get_wiki_task(self, task_id, WIKI_MOVE_TASK_TYPE).await
    }
}
