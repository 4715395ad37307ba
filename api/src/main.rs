// ./api/src/main.rs
use axum::{
    Json,
    Router,
    extract::{Multipart, Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json as JsonResponse, Response}, // Use JsonResponse for clarity
    routing::{delete, get, post, put},
};
use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Import application layer components
use application::{
    ApplicationError,
    AssetStore,
    // Services
    CatalogService,
    ImageUpload,
    ItemChanges,
    // DTOs / Requests / Responses
    ItemDraft,
    MessageResponse,
    PriceQueryRequest,
    PriceTotalResponse,
    SearchRequest,
    SortRequest,
};
// Import domain types used directly in API (sort option parsing)
use domain::SortOption;
// Import infrastructure layer implementations
use infrastructure::{FsAssetStore, JsonFileCatalog};

/// Application state shared with every handler.
#[derive(Clone)]
struct AppState {
    catalog: Arc<CatalogService>,
    assets: Arc<dyn AssetStore>,
}

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DATA_FILE: &str = "data/catalog.json";
const DEFAULT_ASSETS_DIR: &str = "assets";

// Application entry point
#[tokio::main]
async fn main() {
    // --- Logger Initialization ---
    let filter: EnvFilter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
    info!("Logger initialized successfully.");

    // --- Configuration ---
    let port = match env::var("PORT") {
        Ok(port_str) => match u16::from_str(&port_str) {
            Ok(port_num) => {
                info!("Using port {} from environment variable PORT.", port_num);
                port_num
            }
            Err(_) => {
                warn!(
                    "Invalid PORT value '{}' in environment variable. Using default port {}.",
                    port_str, DEFAULT_PORT
                );
                DEFAULT_PORT
            }
        },
        Err(_) => {
            info!(
                "PORT environment variable not set. Using default port {}.",
                DEFAULT_PORT
            );
            DEFAULT_PORT
        }
    };
    let data_file = env::var("CATALOG_DATA_FILE").unwrap_or_else(|_| {
        info!(
            "CATALOG_DATA_FILE not set. Using default '{}'.",
            DEFAULT_DATA_FILE
        );
        DEFAULT_DATA_FILE.to_string()
    });
    let assets_dir = env::var("ASSETS_DIR").unwrap_or_else(|_| {
        info!("ASSETS_DIR not set. Using default '{}'.", DEFAULT_ASSETS_DIR);
        DEFAULT_ASSETS_DIR.to_string()
    });

    // --- Dependency Injection ---
    // 1. Create infrastructure components
    let repository = Arc::new(JsonFileCatalog::new(&data_file));
    let assets: Arc<dyn AssetStore> = match FsAssetStore::open(&assets_dir).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to open asset directory '{}': {}", assets_dir, e);
            std::process::exit(1);
        }
    };
    info!(data_file = %data_file, assets_dir = %assets_dir, "Infrastructure components initialized.");

    // 2. Create the catalog service, loading the persisted collection once
    let catalog = match CatalogService::open(repository, assets.clone()).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Failed to load catalog from '{}': {}", data_file, e);
            std::process::exit(1);
        }
    };
    info!("Catalog service initialized.");

    // 3. Create the application state
    let app_state = AppState { catalog, assets };

    // --- API Router Definition ---
    let app = Router::new()
        .route("/", get(home_handler))
        .route("/assets/:filename", get(serve_asset_handler))
        // Query endpoints
        .route("/search_and_sort", post(search_and_sort_handler))
        .route("/count_price", post(count_price_handler))
        // Record endpoints
        .route("/items", post(create_item_handler))
        .route("/items", get(get_items_handler))
        .route("/sort", post(sort_items_handler))
        .route("/items/:id", put(update_item_handler))
        .route("/items/:id", delete(delete_item_handler))
        // Provide the application state to the handlers
        .with_state(app_state);

    info!("API routes configured.");

    // --- Server Startup ---
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server starting on {}", addr);
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => {
            info!("Server listening on {}", addr);
            listener
        }
        Err(e) => {
            error!("Failed to bind to address {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app.into_make_service()).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }
}

// --- API Handlers ---

async fn home_handler() -> impl IntoResponse {
    (StatusCode::OK, "Welcome to the catalog API!")
}

/// Handler for serving stored images (GET /assets/:filename).
async fn serve_asset_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Response {
    info!(filename = %filename, "Received request to serve asset");
    match state.assets.fetch(&filename).await {
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type_for(&filename))],
            bytes,
        )
            .into_response(),
        Ok(None) => {
            warn!(filename = %filename, "Asset not found");
            (StatusCode::NOT_FOUND, "Asset not found").into_response()
        }
        Err(e) => {
            error!(filename = %filename, "Failed to serve asset via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Content type for a stored asset, derived from its extension the same
/// way uploads are gated.
fn content_type_for(filename: &str) -> &'static str {
    match filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Handler for filtered, ordered record queries (POST /search_and_sort).
async fn search_and_sort_handler(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Response {
    info!(search_term = %request.search_term, "Received search request");
    let sort_option = request
        .sort_option
        .as_deref()
        .map(SortOption::parse)
        .unwrap_or(SortOption::NameAscending);
    let items = state
        .catalog
        .search_and_sort(&request.search_term, sort_option)
        .await;
    (StatusCode::OK, JsonResponse(items)).into_response()
}

/// Handler for summing prices over a query (POST /count_price).
async fn count_price_handler(
    State(state): State<AppState>,
    Json(request): Json<PriceQueryRequest>,
) -> Response {
    info!(query = %request.query, "Received price count request");
    let total = state.catalog.sum_price_for_query(&request.query).await;
    (StatusCode::OK, JsonResponse(PriceTotalResponse { total })).into_response()
}

/// Handler for creating a record from a multipart form (POST /items).
async fn create_item_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    info!("Received request to create item");
    let form = match read_item_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => {
            warn!("Rejected create form: {}", e);
            return map_application_error_to_response(e);
        }
    };
    let draft = match draft_from_form(&form.fields) {
        Ok(draft) => draft,
        Err(e) => {
            warn!("Rejected create form: {}", e);
            return map_application_error_to_response(e);
        }
    };
    let sort_option = form_sort_option(&form.fields);
    match state.catalog.create(draft, form.upload, sort_option).await {
        Ok(item) => (StatusCode::CREATED, JsonResponse(item)).into_response(),
        Err(e) => {
            error!("Failed to create item via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for listing every record (GET /items).
async fn get_items_handler(State(state): State<AppState>) -> Response {
    info!("Received request to list items");
    let items = state.catalog.list().await;
    (StatusCode::OK, JsonResponse(items)).into_response()
}

/// Handler for re-ordering and persisting the collection (POST /sort).
async fn sort_items_handler(
    State(state): State<AppState>,
    Json(request): Json<SortRequest>,
) -> Response {
    info!(sort = ?request.sort, "Received sort request");
    // An absent sort field leaves the current order unchanged.
    let sort_option = request
        .sort
        .as_deref()
        .map(SortOption::parse)
        .unwrap_or(SortOption::Unsorted);
    match state.catalog.resort(sort_option).await {
        Ok(items) => (StatusCode::OK, JsonResponse(items)).into_response(),
        Err(e) => {
            error!("Failed to sort items via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for partial record updates (PUT /items/:id).
async fn update_item_handler(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    mut multipart: Multipart,
) -> Response {
    info!(id, "Received request to update item");
    let form = match read_item_form(&mut multipart).await {
        Ok(form) => form,
        Err(e) => {
            warn!(id, "Rejected update form: {}", e);
            return map_application_error_to_response(e);
        }
    };
    let changes = match changes_from_form(&form.fields) {
        Ok(changes) => changes,
        Err(e) => {
            warn!(id, "Rejected update form: {}", e);
            return map_application_error_to_response(e);
        }
    };
    let sort_option = form_sort_option(&form.fields);
    match state
        .catalog
        .update(id, changes, form.upload, sort_option)
        .await
    {
        Ok(item) => (StatusCode::OK, JsonResponse(item)).into_response(),
        Err(e) => {
            error!(id, "Failed to update item via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

/// Handler for deleting a record (DELETE /items/:id).
async fn delete_item_handler(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    info!(id, "Received request to delete item");
    match state.catalog.delete(id).await {
        Ok(()) => (
            StatusCode::OK,
            JsonResponse(MessageResponse {
                message: "Item deleted".to_string(),
            }),
        )
            .into_response(),
        Err(e) => {
            error!(id, "Failed to delete item via handler: {}", e);
            map_application_error_to_response(e)
        }
    }
}

// --- Multipart Form Handling ---

/// A parsed multipart item form: plain text fields plus the optional
/// image file part.
struct ItemForm {
    fields: HashMap<String, String>,
    upload: Option<ImageUpload>,
}

/// Drains a multipart body into text fields and the `image` file part. A
/// malformed body is an invalid-input error, not a server failure.
async fn read_item_form(multipart: &mut Multipart) -> Result<ItemForm, ApplicationError> {
    let mut fields = HashMap::new();
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApplicationError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "image" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field.bytes().await.map_err(|e| {
                ApplicationError::InvalidInput(format!("failed to read image upload: {e}"))
            })?;
            upload = Some(ImageUpload {
                filename,
                bytes: bytes.to_vec(),
            });
        } else {
            let value = field.text().await.map_err(|e| {
                ApplicationError::InvalidInput(format!("failed to read form field '{name}': {e}"))
            })?;
            fields.insert(name, value);
        }
    }
    Ok(ItemForm { fields, upload })
}

fn require_field<'a>(
    fields: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, ApplicationError> {
    fields
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| ApplicationError::InvalidInput(format!("missing form field '{key}'")))
}

/// Numeric form values are parsed strictly; anything non-numeric is
/// rejected rather than coerced.
fn parse_number(key: &str, raw: &str) -> Result<f64, ApplicationError> {
    raw.trim().parse::<f64>().map_err(|_| {
        ApplicationError::InvalidInput(format!("invalid numeric value for '{key}': '{raw}'"))
    })
}

fn draft_from_form(fields: &HashMap<String, String>) -> Result<ItemDraft, ApplicationError> {
    Ok(ItemDraft {
        name: require_field(fields, "name")?.to_string(),
        description: require_field(fields, "description")?.to_string(),
        age: parse_number("age", require_field(fields, "age")?)?,
        price: parse_number("price", require_field(fields, "price")?)?,
    })
}

fn changes_from_form(fields: &HashMap<String, String>) -> Result<ItemChanges, ApplicationError> {
    Ok(ItemChanges {
        name: fields.get("name").cloned(),
        description: fields.get("description").cloned(),
        age: match fields.get("age") {
            Some(raw) => Some(parse_number("age", raw)?),
            None => None,
        },
        price: match fields.get("price") {
            Some(raw) => Some(parse_number("price", raw)?),
            None => None,
        },
    })
}

/// Sort option carried in a form; a missing field means the endpoint's
/// default ordering.
fn form_sort_option(fields: &HashMap<String, String>) -> SortOption {
    fields
        .get("sort")
        .map(|raw| SortOption::parse(raw))
        .unwrap_or(SortOption::NameAscending)
}

/// Helper function to map ApplicationError enum to HTTP status codes and
/// response body.
fn map_application_error_to_response(err: ApplicationError) -> Response {
    let (status, body) = match err {
        ApplicationError::NotFound(id) => {
            (StatusCode::NOT_FOUND, format!("Item '{}' not found", id))
        }
        ApplicationError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        ApplicationError::Domain(domain_err) => {
            // Map domain validation errors usually to Bad Request
            warn!("Domain validation failed: {}", domain_err);
            (StatusCode::BAD_REQUEST, domain_err.to_string())
        }
        ApplicationError::Persistence(msg) => {
            error!("Persistence failure: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist the catalog".to_string(),
            )
        }
        ApplicationError::AssetStorage(msg) => {
            error!("Asset storage failure: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store or read an image asset".to_string(),
            )
        }
    };
    (status, body).into_response()
}
