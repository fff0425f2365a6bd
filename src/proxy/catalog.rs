//! Built-in table of public proxy sources
//!
//! Adding a source is one entry here; the format decides how it is parsed.

use crate::proxy::source::{ProxySource, ScrapeMethod, SourceFormat};
use std::time::Duration;

const GH: &str = "https://raw.githubusercontent.com";
const FREE_PROXY_TABLE: &str = "table.table.table-striped.table-bordered";

fn plain(id: &str, url: &str, method: ScrapeMethod) -> ProxySource {
    ProxySource::new(id, url, method, SourceFormat::PlainText)
}

fn raw(id: &str, url: &str, method: ScrapeMethod) -> ProxySource {
    ProxySource::new(id, url, method, SourceFormat::RawFile)
}

fn table(id: &str, url: &str, method: ScrapeMethod) -> ProxySource {
    ProxySource::new(id, url, method, SourceFormat::html_table(FREE_PROXY_TABLE))
}

/// Every source the scraper knows about
pub fn default_sources() -> Vec<ProxySource> {
    use ScrapeMethod::*;

    let slow = Duration::from_secs(15);
    let slower = Duration::from_secs(20);

    let mut sources = vec![
        // Direct APIs
        plain("spys.me/http", "https://spys.me/proxy.txt", Http).with_timeout(slow),
        plain("spys.me/socks", "https://spys.me/socks.txt", Socks).with_timeout(slow),
        plain(
            "proxyscrape/http",
            "https://api.proxyscrape.com/?request=getproxies&proxytype=http&timeout=1000&country=All",
            Http,
        )
        .with_timeout(slower),
        plain(
            "proxyscrape/socks4",
            "https://api.proxyscrape.com/?request=getproxies&proxytype=socks4&timeout=1000&country=All",
            Socks4,
        )
        .with_timeout(slower),
        plain(
            "proxyscrape/socks5",
            "https://api.proxyscrape.com/?request=getproxies&proxytype=socks5&timeout=1000&country=All",
            Socks5,
        )
        .with_timeout(slower),
        ProxySource::new(
            "geonode/socks",
            "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc",
            Socks,
            SourceFormat::json_api(&["data"]),
        )
        .with_timeout(slow),
        // Download APIs
        plain(
            "proxy-list.download/https-elite",
            "https://www.proxy-list.download/api/v1/get?type=https&anon=elite",
            Https,
        )
        .with_timeout(slow),
        plain(
            "proxy-list.download/http-elite",
            "https://www.proxy-list.download/api/v1/get?type=http&anon=elite",
            Http,
        )
        .with_timeout(slow),
        plain(
            "proxy-list.download/http-transparent",
            "https://www.proxy-list.download/api/v1/get?type=http&anon=transparent",
            Http,
        )
        .with_timeout(slow),
        plain(
            "proxy-list.download/http-anonymous",
            "https://www.proxy-list.download/api/v1/get?type=http&anon=anonymous",
            Http,
        )
        .with_timeout(slow),
        // HTML tables
        table("sslproxies.org/https", "http://sslproxies.org", Https),
        table("free-proxy-list.net/http", "http://free-proxy-list.net", Http),
        table("us-proxy.org/http", "http://us-proxy.org", Http),
        table("socks-proxy.net/socks", "http://socks-proxy.net", Socks),
        // HTML cards
        ProxySource::new(
            "lunaproxy/http",
            "https://freeproxy.lunaproxy.com/",
            Http,
            SourceFormat::html_div("div.list > div", "div.td"),
        ),
        // JSON APIs
        ProxySource::new(
            "geonode/http",
            "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc&protocols=http",
            Http,
            SourceFormat::json_api(&["data"]),
        ),
        ProxySource::new(
            "geonode/socks5",
            "https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc&protocols=socks5",
            Socks5,
            SourceFormat::json_api(&["data"]),
        ),
        // Plain text downloads
        plain("proxyscan.io/http", "https://www.proxyscan.io/download?type=http", Http),
        plain("proxyscan.io/socks4", "https://www.proxyscan.io/download?type=socks4", Socks4),
        plain("proxyscan.io/socks5", "https://www.proxyscan.io/download?type=socks5", Socks5),
        plain(
            "almroot/http",
            "https://raw.githubusercontent.com/almroot/proxylist/master/list.txt",
            Http,
        ),
        plain(
            "aslisk/http",
            "https://raw.githubusercontent.com/aslisk/proxyhttps/main/https.txt",
            Http,
        ),
        plain(
            "proxy4parsing/http",
            "https://raw.githubusercontent.com/proxy4parsing/proxy-list/main/http.txt",
            Http,
        ),
        raw("proxyspace.pro/http", "https://proxyspace.pro/http.txt", Http),
        raw("proxyspace.pro/socks4", "https://proxyspace.pro/socks4.txt", Socks4),
        raw("proxyspace.pro/socks5", "https://proxyspace.pro/socks5.txt", Socks5),
    ];

    sources.extend(github_sources());
    sources
}

fn github_sources() -> Vec<ProxySource> {
    use ScrapeMethod::*;

    let proxifly = format!("{}/proxifly/free-proxy-list/main/proxies/all/data.txt", GH);
    let monosans = format!("{}/monosans/proxy-list/main/proxies/all.txt", GH);

    let mut sources = vec![
        raw("proxifly/http", &proxifly, Http),
        raw("proxifly/socks4", &proxifly, Socks4),
        raw("proxifly/socks5", &proxifly, Socks5),
        raw("monosans/http", &monosans, Http),
        raw("monosans/socks", &monosans, Socks),
        raw(
            "clarketm/http",
            &format!("{}/clarketm/proxy-list/master/proxy-list-raw.txt", GH),
            Http,
        ),
        raw(
            "sunny9577/http",
            &format!("{}/sunny9577/proxy-scraper/master/proxies.txt", GH),
            Http,
        ),
    ];

    per_protocol(&mut sources, "zloi-user", "zloi-user/hideip.me/main", &[
        (Https, "https.txt"),
        (Http, "http.txt"),
        (Socks4, "socks4.txt"),
        (Socks5, "socks5.txt"),
    ]);
    per_protocol(&mut sources, "thespeedx", "TheSpeedX/PROXY-List/master", &[
        (Http, "http.txt"),
        (Socks4, "socks4.txt"),
        (Socks5, "socks5.txt"),
    ]);
    per_protocol(&mut sources, "shiftytr", "ShiftyTR/Proxy-List/master", &[
        (Http, "http.txt"),
        (Https, "https.txt"),
        (Socks4, "socks4.txt"),
        (Socks5, "socks5.txt"),
    ]);
    per_protocol(&mut sources, "jetkai", "jetkai/proxy-list/main/online-proxies/txt", &[
        (Http, "proxies-http.txt"),
        (Https, "proxies-https.txt"),
        (Socks4, "proxies-socks4.txt"),
        (Socks5, "proxies-socks5.txt"),
    ]);
    per_protocol(&mut sources, "roosterkid", "roosterkid/openproxylist/main", &[
        (Http, "HTTPS_RAW.txt"),
        (Socks4, "SOCKS4_RAW.txt"),
        (Socks5, "SOCKS5_RAW.txt"),
    ]);
    per_protocol(&mut sources, "mmpx12", "mmpx12/proxy-list/master", &[
        (Http, "http.txt"),
        (Https, "https.txt"),
        (Socks4, "socks4.txt"),
        (Socks5, "socks5.txt"),
    ]);
    sources
}

/// One raw list per protocol in a GitHub repository
fn per_protocol(
    sources: &mut Vec<ProxySource>,
    name: &str,
    repo: &str,
    files: &[(ScrapeMethod, &str)],
) {
    for (method, file) in files {
        let id = format!("{}/{}", name, method);
        let url = format!("{}/{}/{}", GH, repo, file);
        sources.push(raw(&id, &url, *method));
    }
}

/// Sources serving a user-requested method (`socks` also pulls socks4/socks5)
pub fn sources_for(method: ScrapeMethod) -> Vec<ProxySource> {
    let methods = method.expand();
    default_sources()
        .into_iter()
        .filter(|source| methods.contains(&source.method))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_source_ids_are_unique() {
        let sources = default_sources();
        let ids: HashSet<_> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids.len(), sources.len());
    }

    #[test]
    fn test_sources_are_well_formed() {
        for source in default_sources() {
            assert!(!source.id.is_empty());
            assert!(source.url.starts_with("http"), "{}", source.url);
        }
    }

    #[test]
    fn test_every_format_is_used() {
        let kinds: HashSet<_> = default_sources().iter().map(|s| s.format.kind()).collect();
        for kind in ["plain-text", "html-table", "html-div", "json-api", "raw-file"] {
            assert!(kinds.contains(kind), "no {} source", kind);
        }
    }

    #[test]
    fn test_sources_for_socks_includes_versions() {
        let socks = sources_for(ScrapeMethod::Socks);
        assert!(socks.iter().any(|s| s.method == ScrapeMethod::Socks));
        assert!(socks.iter().any(|s| s.method == ScrapeMethod::Socks4));
        assert!(socks.iter().any(|s| s.method == ScrapeMethod::Socks5));
        assert!(socks.iter().all(|s| s.method != ScrapeMethod::Http));

        let http = sources_for(ScrapeMethod::Http);
        assert!(!http.is_empty());
        assert!(http.iter().all(|s| s.method == ScrapeMethod::Http));
    }
}
