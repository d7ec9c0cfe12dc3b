mod api;
mod assets;
mod cache;
mod config;
mod connectivity;
mod db;
mod error;
mod logging;
mod outbox;
mod session;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use api::types::NewReview;
use api::{ApiClient, RemoteApi};
use assets::{AssetCache, AssetRequest, HttpFetcher, Interception, Interceptor};
use cache::LocalStore;
use config::Config;
use connectivity::Connectivity;
use outbox::Delivery;
use session::Session;
use store::{Filter, RestaurantStore, Submission};

#[derive(Parser, Debug)]
#[command(name = "restaurant-reviews")]
#[command(about = "Offline-first client for a restaurant review server")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/restaurant-reviews/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  #[command(flatten)]
  Store(StoreCommand),
  #[command(subcommand)]
  Assets(AssetsCommand),
}

#[derive(Subcommand, Debug)]
enum StoreCommand {
  /// List restaurants
  Restaurants {
    #[arg(long, default_value = store::ALL)]
    cuisine: String,
    #[arg(long, default_value = store::ALL)]
    neighborhood: String,
    /// Drop the local copy and fetch the list again
    #[arg(long)]
    refresh: bool,
  },
  /// Show one restaurant with its reviews
  Restaurant { id: i64 },
  Neighborhoods,
  Cuisines,
  /// List the reviews of a restaurant
  Reviews { restaurant_id: i64 },
  /// Mark or unmark a restaurant as favorite
  Favorite {
    id: i64,
    #[arg(action = clap::ArgAction::Set)]
    is_favorite: bool,
  },
  #[command(subcommand)]
  Review(ReviewCommand),
  /// Wait for connectivity and send a review queued while offline
  Sync,
}

#[derive(Subcommand, Debug)]
enum ReviewCommand {
  /// Submit a review, queueing it when the server is unreachable
  Add {
    restaurant_id: i64,
    #[arg(long)]
    name: String,
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=5))]
    rating: u8,
    #[arg(long)]
    comments: String,
    /// Stay running until a queued review has been sent
    #[arg(long)]
    wait: bool,
  },
  Delete { id: i64 },
}

#[derive(Subcommand, Debug)]
enum AssetsCommand {
  /// Populate the current cache generation
  Install,
  /// Purge obsolete generations and start serving
  Activate,
  /// Request an asset through the cache
  Fetch { path: String },
  /// List cache generations
  List,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&Config::data_dir()?.join("logs"))?;

  match args.command {
    Command::Assets(cmd) => run_assets(&config, cmd).await,
    Command::Store(cmd) => run_store(&config, cmd).await,
  }
}

async fn run_store(config: &Config, command: StoreCommand) -> Result<()> {
  let api = Arc::new(ApiClient::new(&config.api)?);
  let local = LocalStore::open(config.store.enabled, config.store_path());
  let connectivity = Connectivity::new(api.is_reachable().await);
  let monitor = connectivity.spawn_monitor(Arc::clone(&api), config.api.check_interval());

  info!(
    local_store = local.is_active(),
    online = connectivity.is_online(),
    "starting"
  );
  let store = RestaurantStore::new(Arc::clone(&api), local, connectivity.clone());
  store.restore_pending()?;

  let mut session = Session::new();
  match command {
    StoreCommand::Restaurants {
      cuisine,
      neighborhood,
      refresh,
    } => {
      if refresh {
        store.refresh_restaurants().await?;
      }
      session.set_filters(Filter::parse(&cuisine), Filter::parse(&neighborhood));
      for r in session.update_restaurants(&store).await? {
        let favorite = if r.is_favorite { "*" } else { " " };
        println!(
          "{} {:>4}  {}  ({}, {})  {}",
          favorite,
          r.id,
          r.name,
          r.neighborhood,
          r.cuisine_type,
          store::url_for_restaurant(r)
        );
      }
    }
    StoreCommand::Restaurant { id } => {
      let r = session.open_restaurant(&store, id).await?.clone();
      println!("{}{}", r.name, if r.is_favorite { " *" } else { "" });
      println!("  {} / {}", r.neighborhood, r.cuisine_type);
      println!("  {}", store::image_srcset(&r));
      for review in &session.reviews {
        println!("  [{}] {} ({}/5): {}", review.id, review.name, review.rating, review.comments);
      }
      if let Some(pending) = &session.pending {
        println!("  [pending] {} ({}/5): {}", pending.name, pending.rating, pending.comments);
      }
    }
    StoreCommand::Neighborhoods => {
      session.load_filters(&store).await?;
      session.neighborhoods.iter().for_each(|n| println!("{}", n));
    }
    StoreCommand::Cuisines => {
      session.load_filters(&store).await?;
      session.cuisines.iter().for_each(|c| println!("{}", c));
    }
    StoreCommand::Reviews { restaurant_id } => {
      for review in store.fetch_reviews_by_restaurant_id(restaurant_id).await {
        println!("[{}] {} ({}/5): {}", review.id, review.name, review.rating, review.comments);
      }
    }
    StoreCommand::Favorite { id, is_favorite } => {
      store.toggle_favorite(id, is_favorite).await?;
      println!("restaurant {} favorite: {}", id, is_favorite);
    }
    StoreCommand::Review(ReviewCommand::Add {
      restaurant_id,
      name,
      rating,
      comments,
      wait,
    }) => {
      let review = NewReview {
        restaurant_id,
        name,
        rating,
        comments,
      };
      match session.submit_review(&store, review).await? {
        Submission::Sent(Some(created)) => println!("review {} created", created.id),
        Submission::Sent(None) => println!("review submitted"),
        Submission::Queued if wait => {
          println!("offline, waiting for the server...");
          report_delivery(store.outbox().settled().await)?;
        }
        Submission::Queued => println!("offline, review queued until the server is reachable"),
      }
    }
    StoreCommand::Review(ReviewCommand::Delete { id }) => {
      store.delete_review(id).await?;
      println!("review {} deleted", id);
    }
    StoreCommand::Sync => {
      if !connectivity.is_online() && store.outbox().pending()?.is_some() {
        println!("waiting for the server...");
      }
      report_delivery(store.outbox().settled().await)?;
    }
  }

  // Flush a pending review if the server is reachable
  if connectivity.is_online() {
    store.outbox().settled().await;
  } else {
    store.outbox().cancel();
  }
  monitor.abort();
  Ok(())
}

fn report_delivery(delivery: Delivery) -> Result<()> {
  match delivery {
    Delivery::Sent => println!("pending review sent"),
    Delivery::Idle => println!("nothing to send"),
    Delivery::Failed => return Err(eyre!("pending review could not be sent")),
    Delivery::Cancelled => return Err(eyre!("sending the pending review was interrupted")),
  }
  Ok(())
}

async fn run_assets(config: &Config, command: AssetsCommand) -> Result<()> {
  let api_port = ApiClient::new(&config.api)?.port();
  let cache = AssetCache::open(&config.assets_path()?)?;
  let origin = url::Url::parse(&config.assets.origin)
    .map_err(|e| eyre!("Invalid asset origin {}: {}", config.assets.origin, e))?;
  let fetcher = HttpFetcher::new(origin, config.api.timeout())?;
  let mut interceptor = Interceptor::new(cache, fetcher, &config.assets, api_port)?;

  match command {
    AssetsCommand::Install => {
      let report = interceptor.install().await?;
      if report.failed.is_empty() {
        println!("{}: cached {} assets", interceptor.generation(), report.cached);
      } else {
        println!(
          "{}: installed empty, unreachable: {}",
          interceptor.generation(),
          report.failed.join(", ")
        );
      }
    }
    AssetsCommand::Activate => {
      let deleted = interceptor.activate()?;
      info!(count = deleted.len(), "obsolete generations removed");
      println!("{} active", interceptor.generation());
      for name in deleted {
        println!("  deleted {}", name);
      }
    }
    AssetsCommand::Fetch { path } => {
      let request = AssetRequest::for_path(interceptor.origin(), &path)?;
      match interceptor.intercept(&request).await {
        Interception::Bypassed => println!("{} bypassed ({:?})", request.url, interceptor.state()),
        Interception::Served { response, from } => println!(
          "{} {} {:?} {} bytes",
          response.status,
          request.url,
          from,
          response.body.len()
        ),
      }
    }
    AssetsCommand::List => {
      for name in interceptor.cache().generations()? {
        let marker = if name == interceptor.generation() { "*" } else { " " };
        println!(
          "{} {} ({} entries)",
          marker,
          name,
          interceptor.cache().len(&name)?
        );
      }
    }
  }
  Ok(())
}
