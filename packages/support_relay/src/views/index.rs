use axum::{
    extract::State,
    response::{Html, IntoResponse},
};
use axum_extra::extract::CookieJar;
use maud::{DOCTYPE, PreEscaped, html};

use super::CSS;
use crate::AppState;
use crate::auth::session_from_jar;

/// The chat page. Issues the session cookie on first visit so the socket
/// opened by the page carries it.
pub async fn index_page(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let (jar, _token) = session_from_jar(jar, &state.auth_config, &state.signer);

    let markup = html! {
        (DOCTYPE)
        html {
            head {
                title { "Support Chat" }
                meta charset="utf-8";
                meta name="viewport" content="width=device-width, initial-scale=1";
                script src="https://cdn.tailwindcss.com" {}
                style { (PreEscaped(CSS)) }
            }
            body class="bg-gray-900 text-gray-200 h-screen overflow-hidden" {
                div class="flex h-screen" {
                    // Admin-only roster
                    div id="roster-panel" class="hidden w-64 bg-gray-800 border-r border-gray-700 flex flex-col flex-shrink-0" {
                        div class="p-4 border-b border-gray-700" {
                            h2 class="text-lg font-bold" { "Visitors" }
                            p class="text-sm text-gray-400 mt-1" { "Select a visitor to reply" }
                        }
                        ul id="roster" class="flex-1 overflow-y-auto p-2 space-y-1" {}
                    }

                    div class="flex-1 flex flex-col min-w-0" {
                        div class="bg-gray-800 border-b border-gray-700 px-4 py-3 flex items-center justify-between flex-shrink-0" {
                            div {
                                span class="font-medium" { "Support Chat" }
                                span id="identity" class="ml-3 text-sm text-gray-400" {}
                            }
                            div class="flex items-center gap-2" {
                                input type="password" id="admin-password"
                                    class="px-2 py-1 bg-gray-700 text-sm rounded border border-gray-600 focus:border-blue-400 focus:outline-none"
                                    placeholder="Admin password";
                                button id="admin-login" class="px-3 py-1 bg-gray-700 hover:bg-gray-600 rounded text-sm" {
                                    "Log in"
                                }
                                button id="clear-chat" class="px-3 py-1 bg-gray-700 hover:bg-gray-600 rounded text-sm" {
                                    "Clear my chat"
                                }
                            }
                        }

                        div id="transcript" class="transcript flex-1 overflow-y-auto p-4 space-y-2" {}

                        div class="border-t border-gray-700 p-3 flex gap-2 flex-shrink-0" {
                            span id="reply-target" class="hidden self-center text-sm text-blue-300" {}
                            input type="text" id="message-input"
                                class="flex-1 px-3 py-2 bg-gray-800 rounded border border-gray-600 focus:border-blue-400 focus:outline-none"
                                placeholder="Type a message" autocomplete="off";
                            button id="send-btn" class="px-4 py-2 bg-blue-600 hover:bg-blue-500 rounded text-sm font-medium" {
                                "Send"
                            }
                        }
                    }
                }
                script { (PreEscaped(SCRIPT)) }
            }
        }
    };

    (jar, Html(markup.into_string()))
}

const SCRIPT: &str = r#"
(() => {
    const transcript = document.getElementById('transcript');
    const roster = document.getElementById('roster');
    const rosterPanel = document.getElementById('roster-panel');
    const identity = document.getElementById('identity');
    const input = document.getElementById('message-input');
    const replyTarget = document.getElementById('reply-target');
    const password = document.getElementById('admin-password');

    let ws = null;
    let isAdmin = false;
    let target = null;

    function line(text, cls) {
        const div = document.createElement('div');
        div.textContent = text;
        if (cls) div.className = cls;
        transcript.appendChild(div);
        transcript.scrollTop = transcript.scrollHeight;
    }

    function selectTarget(sid, name) {
        target = sid;
        replyTarget.textContent = 'To ' + name;
        replyTarget.classList.remove('hidden');
        for (const li of roster.children) {
            li.classList.toggle('selected', li.dataset.sid === sid);
        }
    }

    function renderRoster(users) {
        roster.replaceChildren();
        for (const user of users) {
            const li = document.createElement('li');
            li.className = 'roster-item px-3 py-2 rounded border border-transparent cursor-pointer hover:bg-gray-700';
            li.dataset.sid = user.sid;
            li.textContent = user.name;
            li.addEventListener('click', () => selectTarget(user.sid, user.name));
            if (user.sid === target) li.classList.add('selected');
            roster.appendChild(li);
        }
    }

    function send(event) {
        if (ws && ws.readyState === WebSocket.OPEN) {
            ws.send(JSON.stringify(event));
        }
    }

    function handle(data) {
        switch (data.event) {
            case 'set_identity':
                identity.textContent = data.name;
                break;
            case 'admin_status':
                isAdmin = data.is_admin;
                rosterPanel.classList.toggle('hidden', !isAdmin);
                if (!isAdmin) {
                    target = null;
                    replyTarget.classList.add('hidden');
                }
                if (data.message) line(data.message, 'msg-sys');
                break;
            case 'sys_msg':
                line(data.msg, 'msg-sys');
                break;
            case 'new_msg':
                line(data.user + ': ' + data.text, data.user === 'You' ? 'msg-self' : null);
                if (isAdmin && data.from_sid && target === null) {
                    const match = [...roster.children].find(li => li.dataset.sid === data.from_sid);
                    if (match) selectTarget(data.from_sid, match.textContent);
                }
                break;
            case 'message_ack':
                if (data.status === 'failed') line('Message could not be saved', 'msg-sys');
                break;
            case 'update_user_list':
                renderRoster(data.users);
                break;
            case 'clear_screen':
                transcript.replaceChildren();
                break;
        }
    }

    function connect() {
        const proto = location.protocol === 'https:' ? 'wss:' : 'ws:';
        ws = new WebSocket(proto + '//' + location.host + '/ws');
        ws.onopen = () => send({ event: 'join' });
        ws.onmessage = (msg) => {
            try { handle(JSON.parse(msg.data)); } catch (e) { console.error(e); }
        };
        ws.onclose = () => {
            transcript.replaceChildren();
            line('Disconnected, reconnecting...', 'msg-sys');
            setTimeout(connect, 2000);
        };
    }

    function submit() {
        const text = input.value.trim();
        if (!text) return;
        const event = { event: 'message', text };
        if (isAdmin && target) event.target_sid = target;
        send(event);
        input.value = '';
    }

    document.getElementById('send-btn').addEventListener('click', submit);
    input.addEventListener('keydown', (e) => { if (e.key === 'Enter') submit(); });
    document.getElementById('admin-login').addEventListener('click', () => {
        send({ event: 'admin_login_attempt', password: password.value });
        password.value = '';
    });
    document.getElementById('clear-chat').addEventListener('click', () => send({ event: 'clear_my_chat' }));

    connect();
})();
"#;
