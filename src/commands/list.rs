use std::sync::Arc;

use futures::FutureExt;

use crate::browser::chrome::ChromeContext;
use crate::browser::BrowsingContext;
use crate::models::settings::AppSettings;
use crate::pipeline::batch::load_catalog;
use crate::platforms::hotmart::{with_session, Credentials};

pub async fn run(settings: Arc<AppSettings>, credentials: Credentials) -> anyhow::Result<i32> {
    let ctx: Arc<dyn BrowsingContext> = Arc::new(ChromeContext::launch(&settings).await?);

    let entries = with_session(ctx, credentials, settings, |session| {
        async move {
            let listed = load_catalog(session).await?;
            Ok::<_, anyhow::Error>(listed?)
        }
        .boxed()
    })
    .await?;

    if entries.is_empty() {
        println!("no lessons found");
    }
    for entry in &entries {
        println!("{:>4}  {}", entry.index, entry.title);
    }
    Ok(0)
}
