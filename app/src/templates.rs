use crate::models::{
    CatalogItem, ItemStatus, MediaFilter, MediaKind, ProfileStats, Provider, RecommendedItem, Vote,
};
use crate::tmdb::{poster_url, TmdbItem};

const PLACEHOLDER: &str = "data:image/gif;base64,R0lGODlhAQABAAAAACw=";

/// Browse controls as they were submitted, echoed back into the form.
#[derive(Debug, Clone, Default)]
pub struct BrowseForm {
    pub filter: MediaFilter,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    pub query: String,
    pub page: u32,
}

impl BrowseForm {
    fn query_string(&self, page: u32) -> String {
        let mut qs = format!("?type={}&page={}", self.filter.as_str(), page);
        if let Some(min) = self.min_year {
            qs.push_str(&format!("&min_year={}", min));
        }
        if let Some(max) = self.max_year {
            qs.push_str(&format!("&max_year={}", max));
        }
        qs
    }
}

pub fn render_catalog(username: Option<&str>, form: &BrowseForm, items: &[CatalogItem]) -> String {
    let mut html = String::new();
    html.push_str(&base_start("MediaHub", username));

    html.push_str(r#"<div class="home-page">"#);
    html.push_str(&browse_controls(form, false));

    if items.is_empty() {
        html.push_str(r#"<div class="no-results"><p>Nothing matches these filters.</p></div>"#);
    } else {
        html.push_str(r#"<div class="content-grid">"#);
        for item in items {
            let badge = match item.status {
                ItemStatus::Seen => format!(
                    r#"<span class="badge seen">{}</span>"#,
                    Vote::from_score(item.my_score).map(vote_caption).unwrap_or("Rated")
                ),
                ItemStatus::New => String::new(),
            };
            html.push_str(&format!(
                r#"<div class="content-card"><a href="/title/{}/{}"><img src="{}" alt="{}">{}<div class="card-info"><h3>{}</h3><p class="rating">⭐ {:.1} · {}</p></div></a></div>"#,
                item.media_type,
                item.id,
                poster_url(Some(&item.poster_path), "w342").unwrap_or_default(),
                esc(&item.title),
                badge,
                esc(&item.title),
                item.vote_average,
                year_of(&item.release_date),
            ));
        }
        html.push_str("</div>");

        // search results are a single page
        if form.query.trim().is_empty() {
            html.push_str(&format!(
                r#"<div class="load-more"><a class="play-button" href="/{}">Load more</a></div>"#,
                form.query_string(form.page.max(1) + 1)
            ));
        }
    }

    html.push_str("</div>");
    html.push_str(&base_end());
    html
}

pub fn render_recommendations(username: Option<&str>, form: &BrowseForm, items: &[RecommendedItem]) -> String {
    let mut html = String::new();
    html.push_str(&base_start("For you - MediaHub", username));

    html.push_str(r#"<div class="home-page">"#);
    html.push_str(&browse_controls(form, true));

    if items.is_empty() {
        html.push_str(
            r#"<div class="no-results"><p>Rate a few titles you like to get recommendations.</p><a href="/" class="play-button">Browse the catalog</a></div>"#,
        );
    } else {
        html.push_str(r#"<div class="content-grid">"#);
        for item in items {
            html.push_str(&format!(
                r#"<div class="content-card"><a href="/title/{}/{}"><img src="{}" alt="{}"><div class="card-info"><h3>{}</h3><p class="rating">{}% match</p><p class="because">Because you liked {}</p></div></a></div>"#,
                item.media_type,
                item.id,
                poster_url(item.poster_path.as_deref(), "w342").unwrap_or_else(|| PLACEHOLDER.to_string()),
                esc(&item.title),
                esc(&item.title),
                item.score,
                esc(&item.because_of),
            ));
        }
        html.push_str("</div>");
        html.push_str(&format!(
            r#"<div class="load-more"><a class="play-button" href="/?view=recommendations&type={}">More recommendations</a></div>"#,
            form.filter.as_str()
        ));
    }

    html.push_str("</div>");
    html.push_str(&base_end());
    html
}

fn browse_controls(form: &BrowseForm, recommendations: bool) -> String {
    let option = |value: &str, label: &str| {
        let selected = if form.filter.as_str() == value { " selected" } else { "" };
        format!(r#"<option value="{}"{}>{}</option>"#, value, selected, label)
    };
    let year = |y: Option<i32>| y.map(|y| y.to_string()).unwrap_or_default();
    let view_input = if recommendations {
        r#"<input type="hidden" name="view" value="recommendations">"#
    } else {
        ""
    };

    format!(
        r#"<form class="search-box" action="/" method="get">
            {}
            <input type="text" name="q" placeholder="Search movies and series..." value="{}">
            <select name="type">{}{}{}</select>
            <input type="number" name="min_year" placeholder="From" min="1900" max="2099" value="{}">
            <input type="number" name="max_year" placeholder="To" min="1900" max="2099" value="{}">
            <button type="submit">Apply</button>
        </form>
        <div class="view-switch"><a href="/?type={}"{}>Catalog</a> <a href="/?view=recommendations&type={}"{}>For you</a></div>"#,
        view_input,
        esc(&form.query),
        option("all", "All"),
        option("movie", "Movies"),
        option("tv", "Series"),
        year(form.min_year),
        year(form.max_year),
        form.filter.as_str(),
        if recommendations { "" } else { r#" class="active""# },
        form.filter.as_str(),
        if recommendations { r#" class="active""# } else { "" },
    )
}

pub fn render_detail(
    username: Option<&str>,
    kind: MediaKind,
    item: &TmdbItem,
    providers: &[Provider],
    my_score: Option<i64>,
) -> String {
    let title = item.display_title().unwrap_or("Unknown");
    let mut html = String::new();
    html.push_str(&base_start(&format!("{} - MediaHub", title), username));

    let poster = poster_url(item.artwork(), "w500").unwrap_or_else(|| PLACEHOLDER.to_string());
    let overview = item
        .overview
        .as_deref()
        .filter(|o| !o.is_empty())
        .unwrap_or("No overview available.");

    html.push_str(&format!(
        r#"<div class="detail-page"><div class="detail-content"><img class="detail-poster" src="{}" alt="{}"><div class="detail-info"><h1>{}</h1><div class="meta"><span class="rating">⭐ {:.1}</span><span class="year">{}</span></div><p class="overview">{}</p>"#,
        poster,
        esc(title),
        esc(title),
        item.vote_average.unwrap_or(0.0),
        year_of(item.date().unwrap_or("N/A")),
        esc(overview),
    ));

    html.push_str(r#"<section class="providers"><h2>Where to watch</h2>"#);
    if providers.is_empty() {
        html.push_str(r#"<p class="muted">Not available in your region.</p>"#);
    } else {
        html.push_str(r#"<div class="provider-list">"#);
        for p in providers {
            html.push_str(&format!(
                r#"<div class="provider {:?}"><img src="{}" alt="{}" title="{}"></div>"#,
                p.kind,
                poster_url(Some(&p.logo), "w92").unwrap_or_default(),
                esc(&p.name),
                esc(&p.name),
            ));
        }
        html.push_str("</div>");
    }
    html.push_str("</section>");

    html.push_str(r#"<div class="actions vote-buttons">"#);
    for vote in Vote::ALL.iter().rev() {
        let active = if my_score == Some(vote.score()) { " active" } else { "" };
        html.push_str(&format!(
            r#"<button class="vote{}" data-vote="{}">{}</button>"#,
            active,
            vote.label(),
            vote_caption(*vote)
        ));
    }
    html.push_str(r#"</div><p id="vote-status" class="muted"></p></div></div></div>"#);

    // Votes are only posted with a session; otherwise the visitor is asked to log in.
    html.push_str(&format!(
        r#"
    <script>
    const LOGGED_IN = {};
    const ITEM = {{ id: {}, title: "{}", media_type: "{}" }};

    document.querySelectorAll(".vote").forEach(function(button) {{
        button.addEventListener("click", function() {{
            if (!LOGGED_IN) {{
                alert("Log in to rate titles.");
                return;
            }}
            document.querySelectorAll(".vote").forEach(b => b.classList.remove("active"));
            button.classList.add("active");

            fetch('/api/rate', {{
                method: 'POST',
                headers: {{ 'Content-Type': 'application/json' }},
                credentials: 'same-origin',
                body: JSON.stringify(Object.assign({{ rating_type: button.dataset.vote }}, ITEM))
            }})
            .then(r => r.json())
            .then(data => {{
                document.getElementById("vote-status").textContent =
                    data.status === "success" ? data.total_ratings + " titles rated" : (data.error || "Vote failed");
            }})
            .catch(e => console.log('Vote failed:', e));
        }});
    }});
    </script>
    "#,
        username.is_some(),
        item.id,
        js_string(title),
        kind,
    ));

    html.push_str(&base_end());
    html
}

pub fn render_profile(username: &str, stats: &ProfileStats) -> String {
    let mut html = String::new();
    html.push_str(&base_start("Profile - MediaHub", Some(username)));

    html.push_str(&format!(
        r#"
    <div class="history-page">
        <h1>{}</h1>
        <div class="stats-grid">
            <div class="stat"><span class="value">{}</span><span class="label">Ratings</span></div>
            <div class="stat"><span class="value">{}</span><span class="label">Movies</span></div>
            <div class="stat"><span class="value">{}</span><span class="label">Series</span></div>
            <div class="stat"><span class="value">{:.2}</span><span class="label">Average score</span></div>
        </div>
        <ul class="distribution">
            <li>Super Like: {}</li>
            <li>Like: {}</li>
            <li>Dislike: {}</li>
            <li>Mega Dislike: {}</li>
        </ul>
"#,
        esc(username),
        stats.total_ratings,
        stats.movies,
        stats.series,
        stats.average_score,
        stats.distribution.super_like,
        stats.distribution.like,
        stats.distribution.dislike,
        stats.distribution.mega_dislike,
    ));

    if stats.recent.is_empty() {
        html.push_str(
            r#"<div class="no-results"><p>You haven't rated anything yet.</p><a href="/" class="play-button">Browse the catalog</a></div>"#,
        );
    } else {
        html.push_str(r#"<h2>Recently rated</h2><ul class="recent">"#);
        for r in &stats.recent {
            let link = match (r.tmdb_id, r.media_type.parse::<MediaKind>()) {
                (Some(id), Ok(kind)) => format!(r#"<a href="/title/{}/{}">{}</a>"#, kind, id, esc(&r.title)),
                _ => esc(&r.title),
            };
            html.push_str(&format!(
                r#"<li>{} <span class="badge">{}</span></li>"#,
                link,
                Vote::from_score(r.score).map(vote_caption).unwrap_or("?")
            ));
        }
        html.push_str("</ul>");
    }

    html.push_str("</div>");
    html.push_str(&base_end());
    html
}

pub fn render_login(username: Option<&str>) -> String {
    let mut html = String::new();
    html.push_str(&base_start("Login - MediaHub", username));

    html.push_str(
        r##"
    <div class="login-page">
        <h1>Sign in</h1>
        <div class="login-form">
            <form id="login-form">
                <div class="form-group">
                    <label for="username">Username</label>
                    <input type="text" id="username" name="username" required autofocus>
                </div>
                <div class="form-group">
                    <label for="password">Password</label>
                    <input type="password" id="password" name="password" required minlength="4">
                </div>
                <button type="submit" data-action="login">Login</button>
                <button type="submit" data-action="register">Create account</button>
            </form>
            <div id="login-error" class="error-message"></div>
        </div>
    </div>
    <script>
    document.querySelectorAll("#login-form button").forEach(function(button) {
        button.addEventListener("click", function(event) {
            event.preventDefault();
            fetch('/api/auth/' + button.dataset.action, {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                credentials: 'same-origin',
                body: JSON.stringify({
                    username: document.getElementById("username").value,
                    password: document.getElementById("password").value
                })
            })
            .then(r => r.json())
            .then(data => {
                if (data.token) {
                    window.location.href = "/";
                } else {
                    document.getElementById("login-error").textContent = data.error || "Login failed";
                }
            });
        });
    });
    </script>
    "##,
    );

    html.push_str(&base_end());
    html
}

fn vote_caption(vote: Vote) -> &'static str {
    match vote {
        Vote::SuperLike => "Super Like",
        Vote::Like => "Like",
        Vote::Dislike => "Dislike",
        Vote::MegaDislike => "Mega Dislike",
    }
}

fn year_of(date: &str) -> &str {
    date.split('-').next().unwrap_or(date)
}

fn esc(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn js_string(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('<', "\\u003c")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn base_start(title: &str, username: Option<&str>) -> String {
    let nav_links = if let Some(user) = username {
        format!(
            r#"<a href="/">Catalog</a>
            <a href="/?view=recommendations">For you</a>
            <a href="/profile">Profile</a>
            <span class="user-info">👤 {}</span>
            <a href="/logout" class="logout-btn">Logout</a>"#,
            esc(user)
        )
    } else {
        String::from(
            r#"<a href="/">Catalog</a>
            <a href="/login">Login</a>"#,
        )
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{}</title>
    <style>
        body {{ font-family: sans-serif; background: #111; color: #eee; margin: 0; }}
        .navbar {{ display: flex; justify-content: space-between; padding: 1rem 2rem; background: #1c1c1c; }}
        .navbar a {{ color: #eee; margin-left: 1rem; text-decoration: none; }}
        main {{ padding: 1.5rem 2rem; }}
        .content-grid {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(160px, 1fr)); gap: 1rem; }}
        .content-card img {{ width: 100%; border-radius: 6px; }}
        .content-card a {{ color: inherit; text-decoration: none; position: relative; display: block; }}
        .badge {{ background: #e50914; padding: 2px 6px; border-radius: 4px; font-size: 0.8rem; }}
        .content-card .badge {{ position: absolute; top: 6px; left: 6px; }}
        .vote.active {{ background: #e50914; color: #fff; }}
        .view-switch a.active {{ font-weight: bold; }}
        .muted {{ color: #999; }}
    </style>
</head>
<body>
    <nav class="navbar">
        <div class="nav-brand">
            <a href="/">MediaHub</a>
        </div>
        <div class="nav-links">
            {}
        </div>
    </nav>
    <main>"#,
        esc(title),
        nav_links
    )
}

fn base_end() -> String {
    String::from(r#"</main></body></html>"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AvailabilityKind;

    fn card(title: &str, status: ItemStatus, my_score: i64) -> CatalogItem {
        CatalogItem {
            id: 438631,
            title: title.into(),
            media_type: MediaKind::Movie,
            poster_path: "/dune.jpg".into(),
            overview: String::new(),
            release_date: "2021-09-15".into(),
            vote_average: 7.8,
            popularity: 1.0,
            status,
            my_score,
        }
    }

    #[test]
    fn catalog_cards_link_to_detail_and_show_my_vote() {
        let html = render_catalog(None, &BrowseForm::default(), &[card("Dune", ItemStatus::Seen, 2)]);
        assert!(html.contains(r#"href="/title/movie/438631""#));
        assert!(html.contains(r#"<span class="badge seen">Like</span>"#));
        assert!(html.contains("/?type=all&page=2"));
    }

    #[test]
    fn search_results_have_no_load_more() {
        let form = BrowseForm { query: "dune".into(), ..Default::default() };
        let html = render_catalog(None, &form, &[card("Dune", ItemStatus::New, 0)]);
        assert!(!html.contains("Load more"));
    }

    #[test]
    fn titles_are_escaped() {
        let html = render_catalog(None, &BrowseForm::default(), &[card("<script>x</script>", ItemStatus::New, 0)]);
        assert!(!html.contains("<script>x</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn detail_page_carries_session_flag_and_providers() {
        let item = TmdbItem { id: 438631, title: Some("Dune".into()), ..Default::default() };
        let providers = vec![Provider { name: "Max".into(), logo: "/max.png".into(), kind: AvailabilityKind::Streaming }];

        let anonymous = render_detail(None, MediaKind::Movie, &item, &providers, None);
        assert!(anonymous.contains("const LOGGED_IN = false;"));
        assert!(anonymous.contains("https://image.tmdb.org/t/p/w92/max.png"));

        let logged_in = render_detail(Some("ana"), MediaKind::Movie, &item, &[], Some(5));
        assert!(logged_in.contains("const LOGGED_IN = true;"));
        assert!(logged_in.contains(r#"<button class="vote active" data-vote="SuperLike">"#));
        assert!(logged_in.contains("Not available in your region."));
    }

    #[test]
    fn login_page_posts_to_both_auth_endpoints() {
        let html = render_login(None);
        assert!(html.contains(r#"<form id="login-form">"#));
        assert!(html.contains(r##"document.querySelectorAll("#login-form button")"##));
        assert!(html.contains(r#"data-action="login""#));
        assert!(html.contains(r#"data-action="register""#));
        assert!(html.contains("fetch('/api/auth/' + button.dataset.action"));
        assert!(html.ends_with("</html>"));
    }

    #[test]
    fn script_strings_escape_line_breaks() {
        let escaped = js_string("Line\r\nSep\u{2028}Para\u{2029}\"</script>");
        assert_eq!(escaped, r#"Line\r\nSep\u2028Para\u2029\"\u003c/script>"#);
    }
}
