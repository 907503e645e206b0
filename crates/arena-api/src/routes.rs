//! Endpoint table. Each operation the service exposes is one `Endpoint`
//! variant carrying its path, HTTP method and whether it needs a token.

use axum::{
    Router,
    http::Method,
    middleware,
    routing::{MethodFilter, MethodRouter, on},
};

use crate::accounts;
use crate::auth::{self, AppState};
use crate::error::ApiError;
use crate::friends;
use crate::leaderboard;
use crate::middleware::require_auth;
use crate::simulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Register,
    Login,
    UpdateProfile,
    RecordMatchResult,
    GetLeaderboardPage,
    GetAccountDetails,
    Simulation,
    SearchAccountByUsername,
    SendFriendRequest,
    ListFriendRequests,
    RespondToFriendRequest,
    ListFriends,
}

impl Endpoint {
    pub const ALL: [Endpoint; 12] = [
        Endpoint::Register,
        Endpoint::Login,
        Endpoint::UpdateProfile,
        Endpoint::RecordMatchResult,
        Endpoint::GetLeaderboardPage,
        Endpoint::GetAccountDetails,
        Endpoint::Simulation,
        Endpoint::SearchAccountByUsername,
        Endpoint::SendFriendRequest,
        Endpoint::ListFriendRequests,
        Endpoint::RespondToFriendRequest,
        Endpoint::ListFriends,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Register => "/register",
            Endpoint::Login => "/login",
            Endpoint::UpdateProfile => "/update",
            Endpoint::RecordMatchResult => "/matchresult",
            Endpoint::GetLeaderboardPage => "/leaderboard",
            Endpoint::GetAccountDetails => "/userdetails",
            Endpoint::Simulation => "/simulation",
            Endpoint::SearchAccountByUsername => "/friendship/search",
            Endpoint::SendFriendRequest => "/friendship/friendrequest",
            Endpoint::ListFriendRequests => "/friendship/friendrequestlist",
            Endpoint::RespondToFriendRequest => "/friendship/respondrequest",
            Endpoint::ListFriends => "/friendship/friendlist",
        }
    }

    pub fn method(self) -> Method {
        match self {
            Endpoint::Register
            | Endpoint::Login
            | Endpoint::UpdateProfile
            | Endpoint::RecordMatchResult
            | Endpoint::SendFriendRequest
            | Endpoint::RespondToFriendRequest => Method::POST,
            Endpoint::GetLeaderboardPage
            | Endpoint::GetAccountDetails
            | Endpoint::Simulation
            | Endpoint::SearchAccountByUsername
            | Endpoint::ListFriendRequests
            | Endpoint::ListFriends => Method::GET,
        }
    }

    /// Account details stay public until someone decides otherwise.
    pub fn requires_auth(self) -> bool {
        !matches!(
            self,
            Endpoint::Register | Endpoint::Login | Endpoint::GetAccountDetails
        )
    }

    fn method_filter(self) -> MethodFilter {
        if self.method() == Method::GET {
            MethodFilter::GET
        } else {
            MethodFilter::POST
        }
    }

    fn method_router(self) -> MethodRouter<AppState> {
        let filter = self.method_filter();
        let route = match self {
            Endpoint::Register => on(filter, auth::register),
            Endpoint::Login => on(filter, auth::login),
            Endpoint::UpdateProfile => on(filter, accounts::update_profile),
            Endpoint::RecordMatchResult => on(filter, leaderboard::record_match_result),
            Endpoint::GetLeaderboardPage => on(filter, leaderboard::leaderboard_page),
            Endpoint::GetAccountDetails => on(filter, accounts::account_details),
            Endpoint::Simulation => on(filter, simulation::run_simulation),
            Endpoint::SearchAccountByUsername => on(filter, accounts::search_account),
            Endpoint::SendFriendRequest => on(filter, friends::send_friend_request),
            Endpoint::ListFriendRequests => on(filter, friends::list_friend_requests),
            Endpoint::RespondToFriendRequest => on(filter, friends::respond_to_friend_request),
            Endpoint::ListFriends => on(filter, friends::list_friends_page),
        };
        route.fallback(method_not_allowed)
    }
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn unknown_path() -> ApiError {
    ApiError::NotFound("Not found".into())
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new();

    for endpoint in Endpoint::ALL {
        let mut route = endpoint.method_router();
        if endpoint.requires_auth() {
            route = route.route_layer(middleware::from_fn_with_state(state.clone(), require_auth));
        }
        router = router.route(endpoint.path(), route);
    }

    router.fallback(unknown_path).with_state(state)
}
