//! Outbound message helpers: text, media, and reactions against the Feishu
//! `im/v1` bot API.

use serde::Deserialize;
use serde_json::json;

use crate::error::FeishuError;
use crate::token::TokenCache;

const MESSAGES_URL: &str = "https://open.feishu.cn/open-apis/im/v1/messages";
const IMAGES_URL: &str = "https://open.feishu.cn/open-apis/im/v1/images";
const FILES_URL: &str = "https://open.feishu.cn/open-apis/im/v1/files";

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    code: i64,
    msg: String,
    #[serde(default)]
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    #[allow(dead_code)]
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(alias = "image_key", alias = "file_key")]
    key: String,
}

async fn authed(client: &reqwest::Client, tokens: &TokenCache, url: &str) -> Result<reqwest::RequestBuilder, FeishuError> {
    let token = tokens.get(client).await?;
    Ok(client.post(url).bearer_auth(token))
}

fn check<T>(env: ApiEnvelope<T>) -> Result<T, FeishuError> {
    if env.code != 0 {
        return Err(FeishuError::Api { code: env.code, msg: env.msg });
    }
    env.data.ok_or(FeishuError::Api { code: -1, msg: "missing data field".to_string() })
}

/// Send a plain-text message into a chat. `reply_to`, if given, sends a
/// threaded reply instead of a new root message.
pub async fn send_text(client: &reqwest::Client, tokens: &TokenCache, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<(), FeishuError> {
    let content = json!({"text": text}).to_string();

    let env: ApiEnvelope<MessageData> = if let Some(message_id) = reply_to {
        let url = format!("{MESSAGES_URL}/{message_id}/reply");
        authed(client, tokens, &url)
            .await?
            .json(&json!({"msg_type": "text", "content": content}))
            .send()
            .await?
            .json()
            .await?
    } else {
        authed(client, tokens, MESSAGES_URL)
            .await?
            .query(&[("receive_id_type", "chat_id")])
            .json(&json!({"receive_id": chat_id, "msg_type": "text", "content": content}))
            .send()
            .await?
            .json()
            .await?
    };

    check(env).map(|_| ())
}

/// Upload a local file at `path` and send it as an image or generic file,
/// chosen by `mime_type`.
pub async fn send_media(client: &reqwest::Client, tokens: &TokenCache, chat_id: &str, path: &str, mime_type: Option<&str>) -> Result<(), FeishuError> {
    let is_image = mime_type.map(|m| m.starts_with("image/")).unwrap_or(false);
    let bytes = tokio::fs::read(path).await.map_err(|e| FeishuError::Api { code: -1, msg: e.to_string() })?;
    let filename = std::path::Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();

    let (upload_url, form_type_field, msg_type) = if is_image {
        (IMAGES_URL, ("image_type", "message"), "image")
    } else {
        (FILES_URL, ("file_type", "stream"), "file")
    };

    let token = tokens.get(client).await?;
    let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.clone());
    let form = reqwest::multipart::Form::new().text(form_type_field.0, form_type_field.1).part(if is_image { "image" } else { "file" }, part);

    let env: ApiEnvelope<UploadData> = client.post(upload_url).bearer_auth(token.clone()).multipart(form).send().await?.json().await?;
    let upload = check(env)?;

    let key_field = if is_image { "image_key" } else { "file_key" };
    let content = json!({ key_field: upload.key }).to_string();

    let env: ApiEnvelope<MessageData> = client
        .post(MESSAGES_URL)
        .bearer_auth(token)
        .query(&[("receive_id_type", "chat_id")])
        .json(&json!({"receive_id": chat_id, "msg_type": msg_type, "content": content}))
        .send()
        .await?
        .json()
        .await?;

    check(env).map(|_| ())
}
