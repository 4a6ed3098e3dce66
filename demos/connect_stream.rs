use std::error::Error;

use ai_chat_sdk::chat_api::ChatApiClient;
use ai_chat_sdk::stream::client::ChatStreamClient;
use secrecy::SecretString;
use serde_json::json;

fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let api = ChatApiClient::with_base_url("https://api.example.com")?;
        api.set_token(Some(SecretString::new("REPLACE_WITH_TOKEN".to_string())));

        let mut stream = ChatStreamClient::from_api_client(&api);
        stream.connect()?;

        stream
            .on_open(|| println!("stream open"))
            .on_message(|data| println!("new message: {data}"))
            .on_error(|error| println!("stream error: {error}"))
            .on_close(|code, reason| println!("stream closed code={code:?} reason={reason:?}"));

        stream.send(&json!({"type": "subscribe", "conversation_id": 1}))?;
        stream.run_forever().await;

        Ok::<(), Box<dyn Error>>(())
    })
}
