use std::error::Error;

use ai_chat_sdk::chat_api::{ChatApiClient, PageRequest};
use ai_chat_sdk::config::ChatApiClientOptions;

fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = ChatApiClient::with_options(ChatApiClientOptions::from_env())?;

        let login = client
            .login("REPLACE_WITH_EMAIL", "REPLACE_WITH_PASSWORD")
            .await;
        if !login.is_success() {
            println!("login failed: {}", login.message().unwrap_or_default());
            return Ok(());
        }

        let created = client
            .create_conversation(Some("My First Chat"), Some("Learning about AI"))
            .await
            .into_result()?;
        let Some(conversation_id) = created["conversation"]["id"].as_u64() else {
            println!("unexpected create response: {created}");
            return Ok(());
        };

        let reply = client
            .send_message(conversation_id, "Hello, how can you help me today?", None)
            .await;
        println!("send_message success={} data={:?}", reply.is_success(), reply.data());

        let history = client
            .get_messages(conversation_id, PageRequest::messages())
            .await
            .into_result()?;
        println!("history={history}");

        client.logout().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
