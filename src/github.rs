use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::discovery::{RepositoryApi, RepositoryDescriptor};

/// GitHub client wrapper used for organization discovery
pub struct GitHubClient {
    client: Octocrab,
}

/// Organization fields needed to size the listing
#[derive(Debug, Deserialize)]
struct OrganizationMetadata {
    #[serde(default)]
    owned_private_repos: Option<u64>,
    #[serde(default)]
    public_repos: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ApiOwner {
    login: String,
}

/// Repository fields returned by `GET /orgs/{org}/repos`
#[derive(Debug, Deserialize)]
struct ApiRepository {
    name: String,
    #[serde(default)]
    owner: Option<ApiOwner>,
    #[serde(default)]
    clone_url: Option<String>,
    #[serde(default)]
    default_branch: Option<String>,
    #[serde(default)]
    archived: Option<bool>,
    #[serde(default)]
    language: Option<String>,
}

impl From<ApiRepository> for RepositoryDescriptor {
    fn from(repo: ApiRepository) -> Self {
        Self {
            name: repo.name,
            owner: repo.owner.map(|o| o.login),
            clone_url: repo.clone_url,
            default_branch: repo.default_branch,
            archived: repo.archived.unwrap_or(false),
            language: repo.language,
        }
    }
}

#[derive(Debug, Serialize)]
struct ListParams {
    page: u32,
    per_page: u32,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl GitHubClient {
    /// Create a client authenticated with `token`, optionally against a custom API URL
    pub fn new(token: &str, api_url: Option<&str>) -> Result<Self> {
        let mut builder = Octocrab::builder().personal_token(token.to_string());

        if let Some(url) = api_url {
            builder = builder
                .base_uri(url)
                .with_context(|| format!("Invalid GitHub API URL: {}", url))?;
        }

        let client = builder.build().context("Failed to create GitHub client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RepositoryApi for GitHubClient {
    async fn organization_repo_count(&self, owner: &str) -> Result<usize> {
        debug!("Fetching organization metadata for: {}", owner);

        let org: OrganizationMetadata = self
            .client
            .get(format!("/orgs/{}", owner), None::<&()>)
            .await
            .with_context(|| format!("Failed to get organization {}", owner))?;

        let total = org.owned_private_repos.unwrap_or(0) + org.public_repos.unwrap_or(0);
        Ok(total as usize)
    }

    async fn list_repositories_page(
        &self,
        owner: &str,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<RepositoryDescriptor>> {
        let params = ListParams {
            page,
            per_page,
            kind: "all",
        };

        let repos: Vec<ApiRepository> = self
            .client
            .get(format!("/orgs/{}/repos", owner), Some(&params))
            .await
            .with_context(|| {
                format!("Failed to fetch repositories for organization {} page {}", owner, page)
            })?;

        Ok(repos.into_iter().map(RepositoryDescriptor::from).collect())
    }
}
