use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::browser::chrome::ChromeContext;
use crate::browser::BrowsingContext;
use crate::commands::DownloadArgs;
use crate::core::events::LogEmitter;
use crate::core::ffmpeg::{FfmpegTranscoder, Transcoder};
use crate::models::catalog::Selection;
use crate::models::download::BatchReport;
use crate::models::settings::AppSettings;
use crate::pipeline::{AcquireTarget, Pipeline, StrategyChain, StreamAssembler};
use crate::platforms::hotmart::{with_session, Credentials, MediaResolver, PageExtractor};

pub async fn run(
    settings: Arc<AppSettings>,
    credentials: Credentials,
    args: DownloadArgs,
) -> anyhow::Result<i32> {
    let selection = Selection::parse(&args.targets);
    let mut target = AcquireTarget::new(
        args.output_dir
            .clone()
            .unwrap_or_else(|| settings.download.output_dir.clone()),
    );
    if let Some(name) = &args.output_name {
        target = target.with_file_name(name.clone());
    }

    let transcoder: Arc<dyn Transcoder> = match FfmpegTranscoder::locate().await {
        Some(found) => Arc::new(found),
        None => Arc::new(FfmpegTranscoder::default()),
    };
    let assembler = Arc::new(StreamAssembler::new(transcoder));
    let resolver: Arc<dyn MediaResolver> = Arc::new(PageExtractor::default());
    let chain = StrategyChain::standard(resolver.clone(), assembler.clone(), &settings);
    tracing::debug!("[download] strategy order: {:?}", chain.kinds());
    let pipeline = Pipeline::new(resolver, chain, assembler, Arc::new(LogEmitter::new()));

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("[download] interrupt received, stopping after cleanup");
                cancel.cancel();
            }
        })
    };

    let ctx: Arc<dyn BrowsingContext> = Arc::new(ChromeContext::launch(&settings).await?);
    let outcome = with_session(ctx, credentials, settings, move |session| {
        async move {
            pipeline
                .run(session, &selection, &target, &cancel)
                .await
        }
        .boxed()
    })
    .await;
    watcher.abort();

    let report = outcome?;
    summarize(&report);
    Ok(exit_code(&report))
}

fn summarize(report: &BatchReport) {
    for entry in &report.entries {
        match &entry.result {
            Ok(done) if done.skipped => println!("skip  {}  {}", entry.label, done.path.display()),
            Ok(done) => println!(
                "ok    {}  {} ({} bytes{})",
                entry.label,
                done.path.display(),
                done.file_size,
                done.winning_strategy()
                    .map(|s| format!(", via {}", s))
                    .unwrap_or_default()
            ),
            Err(e) => println!("fail  {}  {}", entry.label, e),
        }
    }
    println!(
        "{} succeeded, {} failed{}",
        report.succeeded(),
        report.failed(),
        if report.cancelled { ", cancelled" } else { "" }
    );
}

fn exit_code(report: &BatchReport) -> i32 {
    if report.cancelled {
        130
    } else if report.failed() > 0 {
        1
    } else {
        0
    }
}
