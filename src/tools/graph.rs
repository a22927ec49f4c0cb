//! Tools backed by the downstream directory/collaboration API
//!
//! Every handler acts as the caller (on-behalf-of) and shapes the response as
//! `{result, userData}`, where `userData` is the response's `value` field.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::{ToolContext, ToolHandler, result_schema};
use crate::downstream::{ApiClient, odata_string, path_segment};
use crate::protocol::{Tool, ToolAnnotations};
use crate::Result;

fn read_only_tool(name: &str, title: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        title: Some(title.to_string()),
        description: Some(description.to_string()),
        input_schema,
        output_schema: Some(result_schema()),
        annotations: Some(ToolAnnotations::read_only_remote()),
    }
}

/// `{result, userData}` with `userData` omitted when absent
fn shaped(result: String, user_data: Option<Value>) -> Value {
    let mut output = json!({ "result": result });
    if let Some(data) = user_data {
        output["userData"] = data;
    }
    output
}

/// The `value` field of a collection response
fn collection(response: &Value) -> Option<Value> {
    response.get("value").cloned()
}

/// JSON text of `value`, `undefined` when absent
fn render(value: Option<&Value>) -> String {
    value.map_or_else(|| "undefined".to_string(), Value::to_string)
}

/// Every user in the caller's tenant
pub struct ListTenantUsers;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTenantUsersInput {
    #[serde(default)]
    company_name: Option<String>,
}

#[async_trait]
impl ToolHandler for ListTenantUsers {
    type Input = ListTenantUsersInput;

    fn definition(&self) -> Tool {
        read_only_tool(
            "list_tenant_users",
            "Get all users in tenant",
            "Calls Microsoft Graph to get all users in the user's tenant.",
            json!({
                "type": "object",
                "properties": {
                    "companyName": {
                        "type": "string",
                        "description": "The company name associated with the tenant"
                    }
                }
            }),
        )
    }

    async fn run(&self, ctx: &ToolContext, input: ListTenantUsersInput) -> Result<Value> {
        let response: Value = ctx.api().get("/v1.0/users").await?;
        let users = collection(&response);

        let company = input.company_name.as_deref().unwrap_or("undefined");
        Ok(shaped(
            format!("Processed for \"{company}\": {}", render(users.as_ref())),
            users,
        ))
    }
}

/// Lists in one site, to discover their ids
pub struct ListSiteLists;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSiteListsInput {
    sharepoint_site_id: String,
}

#[async_trait]
impl ToolHandler for ListSiteLists {
    type Input = ListSiteListsInput;

    fn definition(&self) -> Tool {
        read_only_tool(
            "list_site_lists",
            "Get all lists in a site",
            "Fetch all SharePoint lists available in a specific site to discover their IDs.",
            json!({
                "type": "object",
                "properties": {
                    "sharepointSiteId": {
                        "type": "string",
                        "description": "The GUID of the SharePoint site"
                    }
                },
                "required": ["sharepointSiteId"]
            }),
        )
    }

    async fn run(&self, ctx: &ToolContext, input: ListSiteListsInput) -> Result<Value> {
        let site = &input.sharepoint_site_id;
        let response: Value = ctx
            .api()
            .get(&format!("/v1.0/sites/{}/lists", path_segment(site)))
            .await?;
        let lists = collection(&response);

        Ok(shaped(
            format!("Lists found in site \"{site}\": {}", render(lists.as_ref())),
            lists,
        ))
    }
}

/// Items of one list, addressed by id or, failing that, by title
pub struct ListItems;

#[derive(Debug, Deserialize)]
pub struct ListItemsInput {
    listname: String,
    sharepointsite: String,
}

impl ListItems {
    /// Fetch by list id; on 404 resolve `listname` as a display name and
    /// fetch by the resolved id. The first error is returned when the title
    /// lookup finds nothing.
    async fn fetch(api: &ApiClient, site: &str, listname: &str) -> Result<Value> {
        let site = path_segment(site);
        let items_of = |list_id: &str| {
            format!(
                "/v1.0/sites/{site}/lists/{}/items?expand=fields",
                path_segment(list_id)
            )
        };

        let by_id_error = match api.get(&items_of(listname)).await {
            Ok(items) => return Ok(items),
            Err(e) if e.downstream_status() == Some(404) => e,
            Err(e) => return Err(e),
        };

        debug!(list = %listname, "List id not found, resolving by title");
        let lookup: Value = api
            .get(&format!(
                "/v1.0/sites/{site}/lists?$filter=displayName eq {}",
                odata_string(listname)
            ))
            .await?;

        let Some(list_id) = lookup
            .get("value")
            .and_then(|v| v.get(0))
            .and_then(|list| list.get("id"))
            .and_then(Value::as_str)
        else {
            return Err(by_id_error);
        };

        api.get(&items_of(list_id)).await
    }
}

#[async_trait]
impl ToolHandler for ListItems {
    type Input = ListItemsInput;

    fn definition(&self) -> Tool {
        read_only_tool(
            "list_items",
            "Get SharePoint list items",
            "Fetch items from a specific SharePoint list, by list GUID or list title",
            json!({
                "type": "object",
                "properties": {
                    "listname": {
                        "type": "string",
                        "description": "The GUID (or title) of the SharePoint list"
                    },
                    "sharepointsite": {
                        "type": "string",
                        "description": "The GUID of the SharePoint site"
                    }
                },
                "required": ["listname", "sharepointsite"]
            }),
        )
    }

    async fn run(&self, ctx: &ToolContext, input: ListItemsInput) -> Result<Value> {
        let response = Self::fetch(&ctx.api(), &input.sharepointsite, &input.listname).await?;
        let items = collection(&response);

        Ok(shaped(
            format!(
                "Fetched items for list \"{}\" in site \"{}\": {}",
                input.listname,
                input.sharepointsite,
                render(items.as_ref())
            ),
            items,
        ))
    }
}

/// Sites visible to the caller, via the search API
pub struct SearchSites;

#[derive(Debug, Deserialize)]
pub struct NoInput {}

#[async_trait]
impl ToolHandler for SearchSites {
    type Input = NoInput;

    fn definition(&self) -> Tool {
        read_only_tool(
            "search_sites",
            "Get SharePoint sites",
            "Fetch SharePoint sites for the current user",
            json!({"type": "object", "properties": {}}),
        )
    }

    async fn run(&self, ctx: &ToolContext, _input: NoInput) -> Result<Value> {
        let query = json!({
            "requests": [{
                "entityTypes": ["site"],
                "query": {"queryString": "*"}
            }]
        });
        let response: Value = ctx.api().post("/v1.0/search/query", &query).await?;
        let hits = collection(&response);

        Ok(shaped(
            format!("Search results: {}", render(hits.as_ref())),
            hits,
        ))
    }
}

/// The caller's own profile
pub struct GetMyProfile;

#[async_trait]
impl ToolHandler for GetMyProfile {
    type Input = NoInput;

    fn definition(&self) -> Tool {
        read_only_tool(
            "get_my_profile",
            "Get my profile",
            "Fetch the signed-in user's profile from Microsoft Graph",
            json!({"type": "object", "properties": {}}),
        )
    }

    async fn run(&self, ctx: &ToolContext, _input: NoInput) -> Result<Value> {
        let profile = ctx.api().current_user().await?;
        let result = match profile.get("displayName").and_then(Value::as_str) {
            Some(name) => format!("Signed in as \"{name}\": {profile}"),
            None => format!("Profile: {profile}"),
        };
        Ok(shaped(result, Some(profile)))
    }
}
