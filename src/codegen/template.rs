//! JavaScript module template for generated crawlers.
//!
//! `{{NAME}}` placeholders are substituted with JSON literals, so every
//! inserted value is a valid JavaScript expression whatever it contains.

pub(crate) const CRAWLER_TEMPLATE: &str = r##"// Generated crawler module. Regenerate rather than editing by hand.

const BOARD = {{BOARD}};

const SELECTORS = {
{{SELECTORS}}
};

const LINK = {{LINK}};

const PAGINATION = {{PAGINATION}};

const DEFAULT_DETAIL_URL_TEMPLATE = {{DETAIL_TEMPLATE}};

function candidates(config, role) {
  const override = config && config.selectors ? config.selectors[role] : null;
  const list = override ? [override, ...SELECTORS[role]] : SELECTORS[role];
  return list.filter((selector, index) => selector && list.indexOf(selector) === index);
}

async function queryAll(scope, config, role) {
  for (const selector of candidates(config, role)) {
    let found = [];
    try {
      found = await scope.$$(selector);
    } catch (e) {
      continue;
    }
    if (found.length > 0) return found;
  }
  return [];
}

async function queryOne(scope, config, role) {
  const found = await queryAll(scope, config, role);
  return found.length > 0 ? found[0] : null;
}

async function textOf(handle) {
  if (!handle) return "";
  const text = await handle.evaluate((el) => el.innerText || el.textContent || "");
  return text.replace(/\s+/g, " ").trim();
}

function resolveUrl(href, baseUrl) {
  if (!href) return null;
  const trimmed = href.trim();
  if (!trimmed || trimmed.startsWith("#") || /^javascript:/i.test(trimmed)) return null;
  try {
    return new URL(trimmed, baseUrl).href;
  } catch (e) {
    return null;
  }
}

function detailUrl(config, id) {
  const template = config.detailUrlTemplate || DEFAULT_DETAIL_URL_TEMPLATE;
  const origin = new URL(config.baseUrl || config.url).origin;
  return template.replace("{origin}", origin).replace("{id}", encodeURIComponent(id));
}

async function attributeIn(row, titleEl, attribute) {
  for (const handle of [row, titleEl]) {
    if (!handle) continue;
    const value = await handle.getAttribute(attribute);
    if (value && value.trim()) return value.trim();
  }
  let nested = null;
  try {
    nested = await row.$(`[${attribute}]`);
  } catch (e) {
    return null;
  }
  if (!nested) return null;
  const value = await nested.getAttribute(attribute);
  return value && value.trim() ? value.trim() : null;
}

async function resolveLink(row, titleEl, config) {
  const baseUrl = config.baseUrl || config.url;
  const value = await attributeIn(row, titleEl, LINK.attribute);
  if (value) {
    if (LINK.method === "data-id") {
      return detailUrl(config, value);
    }
    if (LINK.method === "onclick" && LINK.regex) {
      let match = null;
      try {
        match = new RegExp(LINK.regex).exec(value);
      } catch (e) {
        console.warn(`onclick pattern rejected: ${e.message}`);
      }
      if (match && match[1]) return detailUrl(config, match[1]);
    }
    if (LINK.method === "href") {
      const url = resolveUrl(value, baseUrl);
      if (url) return url;
    }
  }
  for (const handle of [titleEl, await row.$("a[href]")]) {
    if (!handle) continue;
    const url = resolveUrl(await handle.getAttribute("href"), baseUrl);
    if (url) return url;
  }
  return null;
}

function isTruncated(title) {
  return /(\.\.\.|\u2026)$/.test(title);
}

async function readDetail(page, link, config) {
  const detail = { detailTitle: "", detailContent: "", attachmentUrl: null };
  try {
    await page.goto(link, { waitUntil: "domcontentloaded", timeout: 20000 });
    detail.detailTitle = await textOf(await queryOne(page, config, "detailTitle"));
    detail.detailContent = await textOf(await queryOne(page, config, "content"));
    const attachment = await queryOne(page, config, "attachment");
    if (attachment) {
      detail.attachmentUrl = resolveUrl(await attachment.getAttribute("href"), link);
    }
  } catch (e) {
    console.warn(`detail page ${link} failed: ${e.message}`);
  }
  return detail;
}

function pageUrl(url, pageNumber) {
  const next = new URL(url);
  next.searchParams.set("page", String(pageNumber));
  return next.href;
}

export async function crawl(page, config) {
  const batchSize = Math.max(1, config.crawlBatchSize || 10);
  const maxPages = PAGINATION === "query" ? Math.max(1, config.maxPages || 1) : 1;
  const jobs = [];

  for (let pageNumber = 1; pageNumber <= maxPages && jobs.length < batchSize; pageNumber++) {
    const listUrl = pageNumber === 1 ? config.url : pageUrl(config.url, pageNumber);
    await page.goto(listUrl, { waitUntil: "domcontentloaded", timeout: 30000 });

    const container = await queryOne(page, config, "container");
    const rows = await queryAll(container || page, config, "row");

    // summaries first: detail navigation invalidates the row handles
    const summaries = [];
    for (const row of rows) {
      if (jobs.length + summaries.length >= batchSize) break;
      const titleEl = await queryOne(row, config, "title");
      const title = await textOf(titleEl);
      if (!title) continue;
      const date = await textOf(await queryOne(row, config, "date"));
      const link = await resolveLink(row, titleEl, config);
      summaries.push({ title, date, link });
    }
    if (summaries.length === 0) break;

    for (const summary of summaries) {
      const { detailTitle, ...detail } = summary.link
        ? await readDetail(page, summary.link, config)
        : { detailTitle: "", detailContent: "", attachmentUrl: null };
      // list pages often cut long titles short; the detail heading is complete
      const title = detailTitle && isTruncated(summary.title) ? detailTitle : summary.title;
      jobs.push({ ...summary, title, ...detail, board: config.name || BOARD.name });
    }
  }

  console.log(`${BOARD.name}: collected ${jobs.length} item(s)`);
  return jobs;
}
"##;
