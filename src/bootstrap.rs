use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config;
use crate::net::RequestScope;
use crate::session::SessionContext;

static APP_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"instagramWebDesktopFBAppId='(\d+)").unwrap());
static HASH_CANDIDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"const \w="([0-9a-f]{32})""#).unwrap());

/// Constants scraped from the platform's frontend bundle at session
/// start. Both rotate with deployments, so the baked-in defaults are only
/// a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConstants {
    pub app_id: String,
    pub query_hash: String,
}

/// Extracts the application id and the highlight-tray query hash from the
/// bundle source. The hash has no stable name; it is the minified
/// constant declared closest before the highlight fetch routine.
pub fn parse_constants(script: &str) -> Result<PlatformConstants> {
    let app_id = APP_ID_RE
        .captures(script)
        .map(|caps| caps[1].to_string())
        .context("application id not found in platform bundle")?;
    let anchor = script
        .find("fetchHighlightReels")
        .context("highlight fetch routine not found in platform bundle")?;
    let query_hash = HASH_CANDIDATE_RE
        .captures_iter(&script[..anchor])
        .last()
        .map(|caps| caps[1].to_string())
        .context("highlight query hash not found in platform bundle")?;
    Ok(PlatformConstants { app_id, query_hash })
}

/// Fetches the bundle and installs the discovered constants on the
/// session. A changed application id is the usual first sign the
/// frontend selectors have rotated too, so it gets a user-visible note.
pub fn discover(ctx: &SessionContext, script_url: &str) -> Result<PlatformConstants> {
    let body = ctx
        .api()
        .network()
        .fetch_text(script_url, 1, RequestScope::Plain)
        .with_context(|| format!("fetch platform bundle {}", script_url))?;
    let constants = match parse_constants(&body) {
        Ok(constants) => constants,
        Err(err) => {
            ctx.sink()
                .warn("Could not read platform constants, some interactions may misbehave");
            return Err(err);
        }
    };
    if constants.app_id != config::KNOWN_APP_ID {
        ctx.sink()
            .warn("Application id changed, some interactions may misbehave");
    }
    ctx.api().network().set_app_id(&constants.app_id);
    ctx.api().set_query_hash(&constants.query_hash);
    tracing::debug!(app_id = %constants.app_id, "platform constants discovered");
    Ok(constants)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = concat!(
        "var instagramWebDesktopFBAppId='936619743392459';",
        "const a=\"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\";",
        "const q=\"d4d88dc1500312af6f937f7b804c68c3\";",
        "function fetchHighlightReels(){}",
        "const z=\"ffffffffffffffffffffffffffffffff\";",
    );

    #[test]
    fn extracts_id_and_hash_from_bundle() {
        let constants = parse_constants(BUNDLE).unwrap();
        assert_eq!(constants.app_id, "936619743392459");
        // Last candidate before the fetch routine wins; later ones are
        // unrelated.
        assert_eq!(constants.query_hash, "d4d88dc1500312af6f937f7b804c68c3");
    }

    #[test]
    fn missing_anchor_is_an_error() {
        let bundle = "var instagramWebDesktopFBAppId='1'; const q=\"d4d88dc1500312af6f937f7b804c68c3\";";
        assert!(parse_constants(bundle).is_err());
    }

    #[test]
    fn missing_app_id_is_an_error() {
        let bundle = "const q=\"d4d88dc1500312af6f937f7b804c68c3\";function fetchHighlightReels(){}";
        assert!(parse_constants(bundle).is_err());
    }
}
