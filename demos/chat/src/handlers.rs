use std::sync::{Arc, RwLock};

use serde::Deserialize;
use socketioxide::{Payload, SocketIoBinding};
use tracing::info;

#[derive(Deserialize)]
struct Auth {
    nickname: String,
}

pub struct ChatState {
    nickname: RwLock<Option<String>>,
}

impl ChatState {
    fn new() -> Self {
        Self { nickname: RwLock::new(None) }
    }

    fn name(&self) -> String {
        self.nickname.read().unwrap().clone().unwrap_or_default()
    }

    fn set_name(&self, name: String) -> Option<String> {
        self.nickname.write().unwrap().replace(name)
    }
}

fn room_arg(args: &[Payload]) -> Option<String> {
    match args.first() {
        Some(Payload::String(s)) => Some(s.clone()),
        _ => None,
    }
}

pub fn binding() -> SocketIoBinding<ChatState> {
    SocketIoBinding::new(ChatState::new)
        .connect(|state, socket, auth| {
            Box::pin(async move {
                let Ok(auth) = serde_json::from_value::<Auth>(auth) else {
                    info!("connect rejected: no nickname provided");
                    return false;
                };
                info!("socket {} connected as {}", socket.id, auth.nickname);
                state.set_name(auth.nickname);
                socket.join("default");
                socket.emit("message", vec![Payload::String("Welcome to the chat!".into())], None);
                true
            })
        })
        .on("message", |state, socket, args| {
            Box::pin(async move {
                let mut args = args.into_iter();
                let (Some(Payload::String(room)), Some(Payload::String(message))) = (args.next(), args.next()) else {
                    return;
                };
                let nickname = state.name();
                info!("relaying message from {nickname} to {room}: {message}");
                let _ = socket.to(room).emit("message", format!("{nickname}: {message}"));
            })
        })
        .on("join", |_state, socket, args| {
            Box::pin(async move {
                if let Some(room) = room_arg(&args) {
                    socket.join(room);
                }
            })
        })
        .on("leave", |_state, socket, args| {
            Box::pin(async move {
                if let Some(room) = room_arg(&args) {
                    socket.leave(&room);
                }
            })
        })
        .on("list", |_state, socket, args| {
            Box::pin(async move {
                match room_arg(&args) {
                    Some(room) => {
                        let names = socket
                            .within(room)
                            .sockets()
                            .into_iter()
                            .filter_map(|s| s.state.get::<Arc<ChatState>>().map(|c| c.name()))
                            .collect::<Vec<_>>()
                            .join(", ");
                        socket.emit("message", vec![Payload::String(names)], None);
                    }
                    None => {
                        let rooms: Vec<Payload> =
                            socket.rooms.read().unwrap().iter().cloned().map(Payload::String).collect();
                        socket.emit("message", vec![Payload::Array(rooms)], None);
                    }
                }
            })
        })
        .on("nickname", |state, socket, args| {
            Box::pin(async move {
                let Some(new_name) = room_arg(&args) else { return };
                let previous = state.set_name(new_name.clone()).unwrap_or_default();
                let _ = socket
                    .to("default")
                    .emit("message", format!("{previous} changed their nickname to {new_name}"));
            })
        })
        .disconnect(|state, socket| {
            Box::pin(async move {
                let nickname = state.name();
                let _ = socket.to("default").emit("message", format!("{nickname} left the chat"));
            })
        })
}
