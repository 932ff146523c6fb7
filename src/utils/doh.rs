use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use log::debug;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

/// Resolver owned by a single client. The hickory resolver is created lazily on
/// the first lookup and dropped together with the client.
#[derive(Debug, Clone)]
pub struct DoHResolver {
    system_dns: bool,
    state: Arc<OnceLock<TokioResolver>>,
}

impl DoHResolver {
    pub fn new(system_dns: bool) -> Self {
        Self {
            system_dns,
            state: Arc::default(),
        }
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn init_resolver(&self) -> TokioResolver {
        let cloudflare = || {
            Resolver::builder_with_config(
                ResolverConfig::cloudflare(),
                TokioConnectionProvider::default(),
            )
        };

        if !self.system_dns {
            return cloudflare().build();
        }

        Resolver::builder(TokioConnectionProvider::default())
            .unwrap_or_else(|err| {
                debug!("[doh] system resolver config unavailable ({err}), using cloudflare");
                cloudflare()
            })
            .build()
    }
}

impl Resolve for DoHResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let this = self.clone();

        Box::pin(async move {
            let resolver = this.state.get_or_init(|| this.init_resolver());

            let lookup = resolver.lookup_ip(name.as_str()).await?;

            let addrs: Addrs = Box::new(lookup.into_iter().map(|addr| SocketAddr::new(addr, 0)));

            Ok(addrs)
        })
    }
}
