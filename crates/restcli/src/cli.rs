//! Exposes the command line application.
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use restcache::config::Config;
use restcache::metrics;
use restcache::rest::{Authorization, Body, Method, RestClient, RestRequest};
use tracing::level_filters::LevelFilter;

use crate::logging;
use crate::output;

/// Performs ReST calls through the on-disk response cache.
///
/// Responses to GET, HEAD and OPTIONS calls are cached and reused while they are fresh.
/// The status and trace of the response are printed to stderr, the body to stdout.
#[derive(Clone, Parser, Debug)]
#[command(author, version, about, long_about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The severity level of logging output.
    ///
    /// Possible values:
    /// off, error, warn, info, debug, trace
    #[arg(long, global = true)]
    log_level: Option<LevelFilter>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Subcommand, Debug)]
enum Command {
    /// Perform a GET call.
    Get(RequestArgs),
    /// Perform a HEAD call.
    Head(RequestArgs),
    /// Perform an OPTIONS call.
    Options(RequestArgs),
    /// Perform a POST call.
    Post(RequestArgs),
    /// Perform a PUT call.
    Put(RequestArgs),
    /// Perform a DELETE call.
    Delete(RequestArgs),
}

impl Command {
    fn into_parts(self) -> (Method, RequestArgs) {
        match self {
            Command::Get(args) => (Method::Get, args),
            Command::Head(args) => (Method::Head, args),
            Command::Options(args) => (Method::Options, args),
            Command::Post(args) => (Method::Post, args),
            Command::Put(args) => (Method::Put, args),
            Command::Delete(args) => (Method::Delete, args),
        }
    }
}

#[derive(Clone, Args, Debug)]
struct RequestArgs {
    /// The URL to call.
    url: String,

    /// Appends a value to a query parameter.
    #[arg(long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Replaces all values of a query parameter.
    #[arg(long = "set-param", value_name = "NAME=VALUE", value_parser = parse_param)]
    set_params: Vec<(String, String)>,

    /// User name for basic authentication.
    #[arg(long)]
    user: Option<String>,

    /// Password for basic authentication.
    #[arg(long, requires = "user")]
    password: Option<String>,

    /// Domain qualifying the user name.
    #[arg(long, requires = "user")]
    domain: Option<String>,

    /// A bearer token.
    #[arg(long, conflicts_with = "user")]
    token: Option<String>,

    /// A file to send as request body.
    #[arg(long, value_name = "FILE")]
    body: Option<PathBuf>,

    /// The content type of the request body.
    #[arg(long)]
    content_type: Option<String>,

    /// The disposition type of the request body, e.g. `attachment`.
    #[arg(long)]
    disposition_type: Option<String>,

    /// Minimum time a successful response is considered fresh, e.g. `10m`.
    #[arg(long, value_parser = humantime::parse_duration)]
    min_cache_period: Option<Duration>,

    /// Time an error response is considered fresh.
    #[arg(long, value_parser = humantime::parse_duration)]
    error_cache_period: Option<Duration>,

    /// Wait at most this long, then fail with a gateway timeout.
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Wait at most this long, then serve an expired cached response.
    #[arg(long, value_parser = humantime::parse_duration)]
    max_block_period: Option<Duration>,

    /// Wait at most this long, then serve an expired cached response as stale.
    #[arg(long, value_parser = humantime::parse_duration)]
    stale_block_period: Option<Duration>,

    /// The user agent to send.
    #[arg(long)]
    agent: Option<String>,

    /// Allow URLs longer than the configured maximum.
    #[arg(long)]
    no_url_length_check: bool,

    /// Do not ask for compressed responses.
    #[arg(long)]
    no_gzip: bool,

    /// Reject URLs with characters that would need encoding.
    #[arg(long)]
    strict_url: bool,

    /// Exit with an error if the response has an error status.
    #[arg(long)]
    check: bool,
}

fn parse_param(value: &str) -> Result<(String, String)> {
    let (name, value) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got `{value}`"))?;
    Ok((name.to_owned(), value.to_owned()))
}

impl RequestArgs {
    fn authorization(&self) -> Option<Authorization> {
        if let Some(user) = &self.user {
            return Some(Authorization::Basic {
                user: user.clone(),
                password: self.password.clone().unwrap_or_default(),
                domain: self.domain.clone(),
            });
        }
        self.token.clone().map(Authorization::Token)
    }

    fn build(self, client: &RestClient, method: Method) -> Result<RestRequest> {
        let authorization = self.authorization();
        let mut builder = client
            .request(self.url)
            .method(method)
            .disable_url_length_check(self.no_url_length_check)
            .disable_gzip(self.no_gzip)
            .strict_url_validation(self.strict_url);

        for (name, value) in self.params {
            builder = builder.add_param(name, value);
        }
        for (name, value) in self.set_params {
            builder = builder.set_param(name, value);
        }
        if let Some(authorization) = authorization {
            builder = builder.authorization(authorization);
        }
        if let Some(body) = self.body {
            builder = builder.body(Body::File(body));
        }
        if let Some(content_type) = self.content_type {
            builder = builder.content_type(content_type);
        }
        if let Some(disposition_type) = self.disposition_type {
            builder = builder.disposition_type(disposition_type);
        }
        if let Some(period) = self.min_cache_period {
            builder = builder.min_cache_period(period);
        }
        if let Some(period) = self.error_cache_period {
            builder = builder.error_cache_period(period);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(period) = self.max_block_period {
            builder = builder.max_block_period(period);
        }
        if let Some(period) = self.stale_block_period {
            builder = builder.stale_block_period(period);
        }
        if let Some(agent) = self.agent {
            builder = builder.agent(agent);
        }

        builder.build().context("invalid request")
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::get(cli.config.as_deref()).context("failed loading config")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, so this is still single-threaded.
    unsafe { logging::init_logging(&config) };

    if let Some(statsd) = &config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create the runtime")?;

    runtime.block_on(run(config, cli.command))
}

async fn run(config: Config, command: Command) -> Result<()> {
    let client = RestClient::from_config(config)?;
    let (method, args) = command.into_parts();
    let check = args.check;
    let request = args.build(&client, method)?;
    tracing::debug!(key = %request.cache_key(), "resolved cache key");

    let response = client.get_response(&request).await;
    output::print_response(&response, method != Method::Head)?;

    if check {
        response.check_status()?;
    }
    Ok(())
}
