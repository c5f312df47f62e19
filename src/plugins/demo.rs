//! Staff-only demo plugins that skip the external identity provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::claims::CanonicalClaims;
use crate::protocol::ProviderError;
use crate::session::Session;
use crate::types::{AuthAttribute, FormAuth};

use super::{
    Authenticated, AuthenticationPlugin, LoginRequest, PluginError, PluginMetadata,
    ProviderFamily, ReturnMethod, ReturnRequest, StartOutcome,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemoKind {
    Bsn,
    Kvk,
    Outage,
}

impl DemoKind {
    const fn attribute(self) -> AuthAttribute {
        match self {
            Self::Bsn | Self::Outage => AuthAttribute::Bsn,
            Self::Kvk => AuthAttribute::Kvk,
        }
    }

    const fn verbose_name(self) -> &'static str {
        match self {
            Self::Bsn => "Demo BSN (test)",
            Self::Kvk => "Demo KvK number (test)",
            Self::Outage => "Demo outage (test)",
        }
    }
}

/// BSN check: nine digits passing the eleven-test.
#[must_use]
pub fn is_valid_bsn(value: &str) -> bool {
    if value.len() != 9 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return false;
    }
    let total: i64 = value
        .bytes()
        .zip([9i64, 8, 7, 6, 5, 4, 3, 2, -1])
        .map(|(byte, weight)| i64::from(byte - b'0') * weight)
        .sum();
    total % 11 == 0
}

#[must_use]
pub fn is_valid_kvk(value: &str) -> bool {
    value.len() == 8 && value.bytes().all(|byte| byte.is_ascii_digit())
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub struct DemoPlugin {
    identifier: String,
    kind: DemoKind,
    metadata: PluginMetadata,
}

impl DemoPlugin {
    #[must_use]
    pub fn new(identifier: &str, kind: DemoKind) -> Self {
        Self {
            identifier: identifier.to_string(),
            kind,
            metadata: PluginMetadata {
                verbose_name: kind.verbose_name().to_string(),
                provides_auth_attributes: BTreeSet::from([kind.attribute()]),
                is_demo_plugin: true,
                return_method: ReturnMethod::Post,
                family: ProviderFamily::Demo,
                loa_ordering: None,
            },
        }
    }

    #[must_use]
    pub fn with_verbose_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.verbose_name = name.into();
        self
    }

    fn field_name(&self) -> &'static str {
        self.kind.attribute().as_str()
    }
}

#[async_trait]
impl AuthenticationPlugin for DemoPlugin {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    async fn start_login(&self, request: &LoginRequest<'_>) -> Result<StartOutcome, PluginError> {
        if self.kind == DemoKind::Outage {
            return Err(ProviderError::Unavailable("demo outage".to_string()).into());
        }
        let field = self.field_name();
        let html = format!(
            "<!DOCTYPE html>\n<html><head><title>{title}</title></head><body>\n\
             <h1>{title}</h1>\n<p>{form}</p>\n\
             <form method=\"post\" action=\"{action}\">\n\
             <input type=\"hidden\" name=\"state\" value=\"{state}\">\n\
             <label for=\"{field}\">{field}</label>\n\
             <input id=\"{field}\" name=\"{field}\" required>\n\
             <button type=\"submit\">Login</button>\n</form>\n</body></html>\n",
            title = escape_html(&self.metadata.verbose_name),
            form = escape_html(&request.form.name),
            action = escape_html(request.return_url.as_str()),
            state = escape_html(request.state),
        );
        Ok(StartOutcome::RenderForm(html))
    }

    async fn handle_return(
        &self,
        request: &ReturnRequest<'_>,
        _session: &mut Session,
    ) -> Result<Authenticated, PluginError> {
        let field = self.field_name();
        let value = request
            .param(field)
            .map(str::trim)
            .ok_or_else(|| PluginError::InvalidPayload(format!("missing '{field}'")))?;
        let valid = match self.kind {
            DemoKind::Bsn | DemoKind::Outage => is_valid_bsn(value),
            DemoKind::Kvk => is_valid_kvk(value),
        };
        if !valid {
            return Err(PluginError::InvalidPayload(format!("invalid '{field}'")));
        }

        Ok(Authenticated {
            form_auth: FormAuth::new(&self.identifier, self.kind.attribute(), value),
            claims: CanonicalClaims::default(),
        })
    }
}
