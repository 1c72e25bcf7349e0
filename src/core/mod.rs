pub mod dependencies;
pub mod direct_downloader;
pub mod events;
pub mod ffmpeg;
pub mod filename;
pub mod hls_downloader;
pub mod http_client;
pub mod logging;
pub mod paths;
pub mod process;
