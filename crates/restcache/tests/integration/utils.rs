use std::path::PathBuf;

use restcache::config::Config;
use restcache::rest::{RestClient, RestRequest};
use restcache_test as test;

pub use test::{HitCounter, refused_url};

/// Setup tests and create a test client.
///
/// This function returns a tuple containing the client to test, and a temporary cache
/// directory. The directory is cleaned up when the [`TempDir`](test::TempDir) instance is
/// dropped. Keep it as guard until the test has finished.
///
/// The `update_config` closure can modify any default configuration if needed before the
/// client is created.
pub fn setup_client(update_config: impl FnOnce(&mut Config)) -> (RestClient, test::TempDir) {
    test::setup();

    let cache_dir = test::tempdir();

    let mut config = Config {
        cache_dir: cache_dir.path().to_owned(),
        ..Default::default()
    };
    update_config(&mut config);

    let client = RestClient::from_config(config).unwrap();

    (client, cache_dir)
}

/// Returns the path of the properties file written for `request`.
pub fn record_path(client: &RestClient, request: &RestRequest) -> PathBuf {
    let config = client.config();
    config
        .transport_dir(&config.transport_root)
        .join(request.cache_key().record_path())
}
