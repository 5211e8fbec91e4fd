mod proxies;
mod retries;
mod streaming;
