pub mod llms;

use std::time::Duration;

use config::Config;
use indoc::formatdoc;

pub use llms::{ReceivedRequest, ScriptedReply, TestOpenAIServer, content_frame};

/// Client configuration pointing at `server`, with fast retries.
///
/// `extra` is appended verbatim and may add further tables.
pub fn client_config(server: &TestOpenAIServer, extra: &str) -> Config {
    let config = formatdoc! {r#"
        [endpoint]
        base_url = "{base_url}"
        api_key = "test-key"
        connect_timeout = "2s"

        {extra}
    "#, base_url = server.base_url()};

    let mut config = Config::from_toml(&config).unwrap();
    config.proxy.direct = true;

    if !extra.contains("[retry]") {
        config.retry.backoff_base = Duration::from_millis(10);
    }

    config
}
