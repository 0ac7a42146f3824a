//! User and token operations for MockSonarClient

use super::{Account, MockSonarClient};
use crate::error::SonarError;
use crate::models::*;

fn ensure_user(client: &MockSonarClient, login: &str) -> Result<(), SonarError> {
    if client.accounts.lock().unwrap().contains_key(login) {
        Ok(())
    } else {
        Err(SonarError::NotFound(format!("User '{}' doesn't exist", login)))
    }
}

pub async fn change_password(client: &MockSonarClient, login: &str, previous_password: &str, password: &str) -> Result<(), SonarError> {
    client.check_reachable()?;
    client.record(format!("change-password {}", login));

    let mut accounts = client.accounts.lock().unwrap();
    let Some(account) = accounts.get_mut(login) else {
        return Err(SonarError::NotFound(format!("User '{}' doesn't exist", login)));
    };
    if account.password != previous_password {
        return Err(SonarError::InvalidRequest("Incorrect password".to_string()));
    }
    account.password = password.to_string();
    Ok(())
}

pub async fn find_user(client: &MockSonarClient, login: &str) -> Result<Option<User>, SonarError> {
    client.check_reachable()?;
    Ok(client.accounts.lock().unwrap().get(login).map(|account| User {
        login: login.to_string(),
        name: Some(account.name.clone()),
    }))
}

pub async fn create_user(client: &MockSonarClient, request: &CreateUserRequest) -> Result<User, SonarError> {
    client.check_reachable()?;
    client.record(format!("create-user {}", request.login));

    let mut accounts = client.accounts.lock().unwrap();
    if accounts.contains_key(&request.login) {
        return Err(SonarError::InvalidRequest(format!(
            "An active user with login '{}' already exists",
            request.login
        )));
    }
    accounts.insert(
        request.login.clone(),
        Account {
            name: request.name.clone(),
            password: request.password.clone(),
        },
    );
    Ok(User {
        login: request.login.clone(),
        name: Some(request.name.clone()),
    })
}

pub async fn generate_token(client: &MockSonarClient, login: &str, name: &str) -> Result<UserToken, SonarError> {
    client.check_reachable()?;
    client.record(format!("generate-token {} {}", login, name));
    ensure_user(client, login)?;

    let key = (login.to_string(), name.to_string());
    if client.tokens.lock().unwrap().contains_key(&key) {
        return Err(SonarError::InvalidRequest(format!(
            "A user token for login '{}' and name '{}' already exists",
            login, name
        )));
    }
    let token = format!("squ_{}", client.next_id());
    client.tokens.lock().unwrap().insert(key, token.clone());
    Ok(UserToken {
        login: login.to_string(),
        name: name.to_string(),
        token,
    })
}

pub async fn revoke_token(client: &MockSonarClient, login: &str, name: &str) -> Result<(), SonarError> {
    client.check_reachable()?;
    client.record(format!("revoke-token {} {}", login, name));

    client
        .tokens
        .lock()
        .unwrap()
        .remove(&(login.to_string(), name.to_string()));
    Ok(())
}
